//! Process-wide Strict Mode Tests
//!
//! The strict switch is global, so these tests live in their own binary and
//! in a single test function: nothing else in this process hydrates while the
//! switch is off.

mod common;

use common::*;
use dirmap::config::is_strict_mode_enabled;
use dirmap::prelude::*;

#[tokio::test]
async fn test_disable_and_enable_strict_mode() {
    let (_directory, manager) = setup();
    let repository = manager.get_repository::<Person>().unwrap();
    assert!(is_strict_mode_enabled());

    let err = repository.find("jdoe").await.unwrap_err();
    assert_eq!(err.error_code(), "INVALID_HYDRATE");

    EntityManager::disable_strict_mode();
    assert!(!is_strict_mode_enabled());

    let person = repository.find("jdoe").await.unwrap();
    assert_eq!(person.uid, "jdoe");
    assert_eq!(person.given_name, "");

    // Other managers observe the same switch
    let (_other_directory, other) = setup();
    let people = other
        .get_repository::<People>()
        .unwrap()
        .find("jdoe")
        .await
        .unwrap();
    assert!(people.telephone_number.is_empty());

    EntityManager::enable_strict_mode();
    assert!(is_strict_mode_enabled());

    let err = repository.find("jdoe").await.unwrap_err();
    assert!(matches!(
        err,
        EntityError::InvalidHydrate { ref attribute, .. } if attribute == "givenName"
    ));
}
