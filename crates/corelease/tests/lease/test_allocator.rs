use crate::helpers::{assert_consistent, spawn_host};
use corelease::{ErrorKind, LeaseError, LeaseRequest, SessionId};

#[test]
fn test_deterministic_selection() {
    let host = spawn_host(8);
    host.acquire("holder", LeaseRequest::Cores(vec![1, 3]))
        .unwrap();

    let granted = host.acquire("session", LeaseRequest::Count(3)).unwrap();
    assert_eq!(granted, vec![0, 2, 4]);
    assert_eq!(host.leased(), vec![0, 1, 2, 3, 4]);
    assert_consistent(&host.state(), 8);
}

#[test]
fn test_no_partial_grant() {
    let host = spawn_host(8);
    host.acquire("a", LeaseRequest::Count(5)).unwrap();
    let before = host.state();

    let err = host.acquire("b", LeaseRequest::Count(4)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InsufficientResources);
    assert_eq!(host.state(), before);
    assert!(!host.state().owners.contains_key(&SessionId::from("b")));
}

#[test]
fn test_explicit_list_exclusivity() {
    let host = spawn_host(8);
    assert_eq!(
        host.acquire("a", LeaseRequest::Cores(vec![2, 3])).unwrap(),
        vec![2, 3]
    );

    let err = host
        .acquire("b", LeaseRequest::Cores(vec![3, 4]))
        .unwrap_err();
    assert!(matches!(err, LeaseError::ResourceConflict { ref cores } if cores == &vec![3]));
    assert_eq!(host.leased(), vec![2, 3]);
}

#[test]
fn test_count_and_explicit_requests_share_the_pool() {
    let host = spawn_host(4);
    host.acquire("explicit", LeaseRequest::Cores(vec![0, 2]))
        .unwrap();
    assert_eq!(
        host.acquire("count", LeaseRequest::Count(2)).unwrap(),
        vec![1, 3]
    );

    let err = host.acquire("late", LeaseRequest::Count(1)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InsufficientResources);
    let err = host
        .acquire("late", LeaseRequest::Cores(vec![1]))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ResourceConflict);
    assert_consistent(&host.state(), 4);
}

#[test]
fn test_invalid_explicit_lists() {
    let host = spawn_host(4);
    for cores in [vec![4], vec![0, 0], vec![]] {
        let err = host.acquire("a", LeaseRequest::Cores(cores)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
    }
    assert!(host.leased().is_empty());
}

#[test]
fn test_state_survives_reopen() {
    let host = spawn_host(8);
    host.acquire("a", LeaseRequest::Count(2)).unwrap();

    let other = host.session_manager();
    assert_eq!(
        other
            .acquire(&"b".into(), &LeaseRequest::Count(2))
            .unwrap(),
        vec![2, 3]
    );
    assert_eq!(host.leased(), vec![0, 1, 2, 3]);
}

#[test]
fn test_corrupt_state_fails_the_operation() {
    let host = spawn_host(8);
    std::fs::write(host.manager.store().state_path(), "{ not json").unwrap();

    let err = host.acquire("a", LeaseRequest::Count(1)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StateIo);

    // nothing was overwritten
    let raw = std::fs::read_to_string(host.manager.store().state_path()).unwrap();
    assert_eq!(raw, "{ not json");
}
