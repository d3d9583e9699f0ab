#![forbid(unsafe_code)]

use parkspot_contracts::identity::SignInRequest;
use parkspot_contracts::parking::DisplayName;
use parkspot_storage::{IdentityError, IdentityProvider, MemoryIdentityProvider};

fn request(name: &str) -> SignInRequest {
    SignInRequest {
        display_name: DisplayName::new(name).unwrap(),
    }
}

#[tokio::test]
async fn at_identity_db_01_watch_holds_current_value_on_registration() {
    let p = MemoryIdentityProvider::new_in_memory();
    assert!(p.watch_identity().borrow().is_none());

    let who = p.sign_in(request("Ada")).await.unwrap();
    let rx = p.watch_identity();
    assert_eq!(rx.borrow().as_ref(), Some(&who));
    assert_eq!(p.current_identity(), Some(who));
}

#[tokio::test]
async fn at_identity_db_02_change_stream_observes_sign_out() {
    let p = MemoryIdentityProvider::new_in_memory();
    let mut rx = p.watch_identity();

    p.sign_in(request("Ada")).await.unwrap();
    rx.changed().await.unwrap();
    assert!(rx.borrow_and_update().is_some());

    p.sign_out().await;
    rx.changed().await.unwrap();
    assert!(rx.borrow_and_update().is_none());
}

#[tokio::test]
async fn at_identity_db_03_uid_is_stable_per_display_name() {
    let p = MemoryIdentityProvider::new_in_memory();
    let a = p.sign_in(request("Ada")).await.unwrap();
    p.sign_out().await;
    let again = p.sign_in(request("Ada")).await.unwrap();
    let other = p.sign_in(request("Bob")).await.unwrap();

    assert_eq!(a.uid, again.uid);
    assert_ne!(a.uid, other.uid);
    assert_eq!(other.display_name.as_str(), "Bob");
}

#[tokio::test]
async fn at_identity_db_04_scripted_failures_leave_state_signed_out() {
    let p = MemoryIdentityProvider::new_in_memory();
    p.fail_next_sign_in(IdentityError::UserCancelled);
    p.fail_next_sign_in(IdentityError::NetworkError("offline".to_string()));

    assert_eq!(
        p.sign_in(request("Ada")).await,
        Err(IdentityError::UserCancelled)
    );
    assert!(matches!(
        p.sign_in(request("Ada")).await,
        Err(IdentityError::NetworkError(_))
    ));
    assert!(p.current_identity().is_none());
    assert!(p.sign_in(request("Ada")).await.is_ok());
}
