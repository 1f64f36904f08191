//! Integration tests for the allocation engine's guarantees
//!
//! These run against real SQLite databases (in-memory and file-backed) through
//! the public service layer.

use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use territory_engine::db::{agents, assignments};
use territory_engine::services::audit_service::DEFAULT_TRAIL_LIMIT;
use territory_engine::services::SkipReason;
use territory_engine::{
    void_placement, Actor, AssignmentAction, Config, ManualClock, NewCity, Services, TerritoryDb,
    TerritoryError,
};
use tempfile::TempDir;

fn city(id: &str, country: &str, reserved: bool) -> NewCity {
    NewCity {
        id: id.into(),
        country_code: country.into(),
        name: id.into(),
        latitude: 10.0,
        longitude: 10.0,
        reserved,
    }
}

fn services_with(db: TerritoryDb, cities: Vec<NewCity>, agent_ids: &[&str]) -> Services {
    let services = Services::new(Arc::new(db), &Config::default());
    services.catalog.seed(cities).unwrap();
    for id in agent_ids {
        services.registration.register_agent(id, None).unwrap();
    }
    services
}

fn in_memory(cities: Vec<NewCity>, agent_ids: &[&str]) -> Services {
    services_with(TerritoryDb::open_in_memory().unwrap(), cities, agent_ids)
}

fn with_paris(db: TerritoryDb, agent_ids: &[&str]) -> Services {
    services_with(db, vec![city("paris", "FR", false)], agent_ids)
}

fn trail_len(services: &Services) -> usize {
    services
        .db
        .with_conn(|conn| assignments::list_since(conn, 0, u32::MAX))
        .unwrap()
        .len()
}

/// N concurrent claims on one city: exactly one wins
#[test]
fn test_concurrent_claims_have_single_winner() {
    const CLAIMANTS: usize = 16;

    let temp = TempDir::new().unwrap();
    let db = TerritoryDb::open(temp.path(), Duration::from_secs(5)).unwrap();
    let ids: Vec<String> = (0..CLAIMANTS).map(|i| format!("agent-{}", i)).collect();
    let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
    let services = with_paris(db, &id_refs);

    let barrier = Arc::new(Barrier::new(CLAIMANTS));
    let handles: Vec<_> = ids
        .iter()
        .cloned()
        .map(|agent_id| {
            let allocation = services.allocation.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                allocation.claim("paris", &agent_id, &Actor::SelfRegistration, "race")
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(winners.len(), 1);
    for result in &results {
        if let Err(e) = result {
            assert!(matches!(e, TerritoryError::AlreadyOwned { .. }), "unexpected error: {:?}", e);
        }
    }

    let winner = &winners[0].agent.id;
    let paris = services.catalog.get("paris").unwrap();
    assert_eq!(paris.owner_id.as_ref(), Some(winner));

    let holders = services.registration.list_agents(true, 1000).unwrap();
    let holding: Vec<_> = holders
        .iter()
        .filter(|a| a.territory.city_id() == Some("paris"))
        .collect();
    assert_eq!(holding.len(), 1);
    assert_eq!(trail_len(&services), 1);
}

/// Two independent handles on the same file race through SQLite's own lock
#[test]
fn test_concurrent_claims_across_connections() {
    let temp = TempDir::new().unwrap();
    let first = with_paris(
        TerritoryDb::open(temp.path(), Duration::from_secs(5)).unwrap(),
        &["a", "b"],
    );
    let second = Services::new(
        Arc::new(TerritoryDb::open(temp.path(), Duration::from_secs(5)).unwrap()),
        &Config::default(),
    );

    let barrier = Arc::new(Barrier::new(2));
    let spawn = |allocation: Arc<territory_engine::services::AllocationService>, agent: &'static str| {
        let barrier = barrier.clone();
        thread::spawn(move || {
            barrier.wait();
            allocation.claim("paris", agent, &Actor::SelfRegistration, "race")
        })
    };
    let h1 = spawn(first.allocation.clone(), "a");
    let h2 = spawn(second.allocation.clone(), "b");
    let results = [h1.join().unwrap(), h2.join().unwrap()];

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert_eq!(first.db.stats().unwrap().owned_city_count, 1);
    assert_eq!(first.db.stats().unwrap().assignment_count, 1);
}

#[test]
fn test_release_without_territory_is_idempotent() {
    let services = in_memory(vec![city("paris", "FR", false)], &["a"]);
    services.allocation.claim("paris", "a", &Actor::SelfRegistration, "").unwrap();

    let first = services.allocation.release("a", &Actor::SelfRegistration, "leaving").unwrap();
    assert_eq!(first.city.as_ref().map(|c| c.id.as_str()), Some("paris"));

    let second = services.allocation.release("a", &Actor::SelfRegistration, "leaving").unwrap();
    assert!(second.city.is_none());
    assert!(second.record_id.is_none());

    let trail = services.audit.trail_for_agent("a", DEFAULT_TRAIL_LIMIT).unwrap();
    let releases = trail.iter().filter(|r| r.action == AssignmentAction::Released).count();
    assert_eq!(releases, 1);
}

#[test]
fn test_reserved_city_needs_admin() {
    let services = in_memory(vec![city("vatican", "VA", true)], &["a"]);

    let err = services
        .allocation
        .claim("vatican", "a", &Actor::SelfRegistration, "")
        .unwrap_err();
    assert!(matches!(err, TerritoryError::Reserved(_)));

    let admin = Actor::admin("ops-1").unwrap();
    let outcome = services
        .allocation
        .administrative_override("vatican", "a", &admin, "granted")
        .unwrap();
    assert_eq!(outcome.city.owner_id.as_deref(), Some("a"));
    assert!(outcome.city.reserved);

    let trail = services.audit.trail_for_city("vatican", DEFAULT_TRAIL_LIMIT).unwrap();
    assert_eq!(trail.len(), 1);
    assert_eq!(trail[0].action, AssignmentAction::AdministrativeOverride);
    assert_eq!(trail[0].actor, admin);
}

#[test]
fn test_voiding_is_terminal() {
    let services = in_memory(vec![city("paris", "FR", false), city("lyon", "FR", false)], &["a"]);
    services.allocation.claim("paris", "a", &Actor::SelfRegistration, "").unwrap();
    services
        .allocation
        .void_agent("a", &void_placement("a"), &Actor::System, "inactive")
        .unwrap();

    let err = services.allocation.claim("lyon", "a", &Actor::SelfRegistration, "").unwrap_err();
    assert!(matches!(err, TerritoryError::AgentVoided(_)));

    let err = services.allocation.release("a", &Actor::SelfRegistration, "").unwrap_err();
    assert!(matches!(err, TerritoryError::AgentVoided(_)));

    let err = services.allocation.claim("lyon", "a", &Actor::SelfRegistration, "").unwrap_err();
    assert!(matches!(err, TerritoryError::AgentVoided(_)));

    let admin = Actor::admin("ops-1").unwrap();
    let err = services
        .allocation
        .administrative_override("lyon", "a", &admin, "")
        .unwrap_err();
    assert!(matches!(err, TerritoryError::AgentVoided(_)));

    let before = trail_len(&services);
    let err = services
        .allocation
        .void_agent("a", &void_placement("a"), &Actor::System, "again")
        .unwrap_err();
    assert!(matches!(err, TerritoryError::AlreadyVoided(_)));
    assert_eq!(trail_len(&services), before);
}

/// Each ownership change leaves exactly one record naming its city, agent,
/// action and actor
#[test]
fn test_trail_records_every_change() {
    let services = in_memory(
        vec![city("paris", "FR", false), city("rome", "IT", false)],
        &["a", "b", "c"],
    );
    let admin = Actor::admin("ops-1").unwrap();
    let start = services.audit.latest_id().unwrap();

    services.allocation.claim("paris", "a", &Actor::SelfRegistration, "r1").unwrap();
    services.allocation.release("a", &Actor::SelfRegistration, "r2").unwrap();
    services.allocation.administrative_override("rome", "b", &admin, "r3").unwrap();
    services.allocation.claim("paris", "c", &admin, "r4").unwrap();
    services
        .allocation
        .void_agent("a", &void_placement("a"), &Actor::System, "r5")
        .unwrap();

    // Rejected operations leave no trace
    assert!(services.allocation.claim("paris", "a", &Actor::SelfRegistration, "x").is_err());
    assert!(services.allocation.claim("rome", "c", &Actor::SelfRegistration, "x").is_err());

    let records = services.audit.since(start, DEFAULT_TRAIL_LIMIT).unwrap();
    let observed: Vec<_> = records
        .iter()
        .map(|r| {
            (
                r.city_id.as_deref(),
                r.agent_id.as_deref(),
                r.action,
                r.actor.clone(),
                r.reason.as_str(),
            )
        })
        .collect();
    assert_eq!(
        observed,
        vec![
            (Some("paris"), Some("a"), AssignmentAction::Claimed, Actor::SelfRegistration, "r1"),
            (Some("paris"), Some("a"), AssignmentAction::Released, Actor::SelfRegistration, "r2"),
            (Some("rome"), Some("b"), AssignmentAction::AdministrativeOverride, admin.clone(), "r3"),
            (Some("paris"), Some("c"), AssignmentAction::Claimed, admin.clone(), "r4"),
            (None, Some("a"), AssignmentAction::Voided, Actor::System, "r5"),
        ]
    );
}

/// Outcomes that touch two ownership pairs report both records
#[test]
fn test_compound_outcomes_match_trail_growth() {
    let services = in_memory(vec![city("paris", "FR", false)], &["a", "b"]);
    let admin = Actor::admin("ops-1").unwrap();

    services.allocation.claim("paris", "a", &Actor::SelfRegistration, "").unwrap();
    let before = trail_len(&services);
    let outcome = services
        .allocation
        .administrative_override("paris", "b", &admin, "dispute")
        .unwrap();
    assert_eq!(outcome.displaced_agent_id.as_deref(), Some("a"));
    assert_eq!(trail_len(&services), before + outcome.record_ids.len());
    assert_eq!(outcome.record_ids.len(), 2);

    let before = trail_len(&services);
    let voided = services
        .allocation
        .void_agent("b", &void_placement("b"), &Actor::System, "inactive")
        .unwrap();
    assert_eq!(voided.released_city_id.as_deref(), Some("paris"));
    assert_eq!(trail_len(&services), before + voided.record_ids.len());

    let a = services
        .db
        .with_conn(|conn| agents::get_agent(conn, "a"))
        .unwrap()
        .unwrap();
    assert!(a.territory.city_id().is_none());
    assert!(!a.voided);
}

#[test]
fn test_agent_cannot_hold_two_cities() {
    let services = in_memory(vec![city("paris", "FR", false), city("lyon", "FR", false)], &["a"]);
    services.allocation.claim("paris", "a", &Actor::SelfRegistration, "").unwrap();
    let err = services.allocation.claim("lyon", "a", &Actor::SelfRegistration, "").unwrap_err();
    assert!(matches!(err, TerritoryError::AgentAlreadyHasTerritory { .. }));
    assert!(services.catalog.get("lyon").unwrap().owner_id.is_none());
}

/// Two sweeps over the same stale population void each agent exactly once
#[test]
fn test_concurrent_sweeps_void_each_agent_once() {
    const AGENTS: usize = 12;

    let temp = TempDir::new().unwrap();
    let db = Arc::new(TerritoryDb::open(temp.path(), Duration::from_secs(5)).unwrap());
    let clock = Arc::new(ManualClock::new(chrono::Utc::now()));
    let services = Services::with_clock(db, clock.clone(), &Config::default());
    services
        .catalog
        .seed((0..AGENTS / 2).map(|i| city(&format!("c-{}", i), "FR", false)).collect())
        .unwrap();
    for i in 0..AGENTS {
        let agent_id = format!("agent-{}", i);
        services.registration.register_agent(&agent_id, None).unwrap();
        if i < AGENTS / 2 {
            let city_id = format!("c-{}", i);
            services
                .allocation
                .claim(&city_id, &agent_id, &Actor::SelfRegistration, "")
                .unwrap();
        }
    }
    let before = trail_len(&services);
    clock.advance(chrono::Duration::days(10));

    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = (0..2)
        .map(|_| {
            let eviction = services.eviction.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                eviction.sweep(7)
            })
        })
        .collect();
    let reports: Vec<_> = handles.into_iter().map(|h| h.join().unwrap().unwrap()).collect();

    let mut voided = HashSet::new();
    for report in &reports {
        assert!(report.failures.is_empty(), "failures: {:?}", report.failures);
        assert!(report.skipped.iter().all(|s| s.reason == SkipReason::AlreadyVoided));
        assert_eq!(report.voided.len() + report.skipped.len(), report.candidates);
        for agent_id in &report.voided {
            assert!(voided.insert(agent_id.clone()), "{} voided twice", agent_id);
        }
    }
    assert_eq!(voided.len(), AGENTS);

    // One void record per agent plus one release per held city
    let records = services
        .db
        .with_conn(|conn| assignments::list_since(conn, 0, u32::MAX))
        .unwrap();
    let void_records = records.iter().filter(|r| r.action == AssignmentAction::Voided).count();
    assert_eq!(void_records, AGENTS);
    assert_eq!(trail_len(&services), before + AGENTS + AGENTS / 2);

    let stats = services.db.stats().unwrap();
    assert_eq!(stats.voided_agent_count, AGENTS as u64);
    assert_eq!(stats.owned_city_count, 0);
}

/// A claim racing a void either lands first and is released by the void, or
/// is refused; a voided agent never ends up owning a city
#[test]
fn test_claim_racing_void_never_leaves_voided_owner() {
    let admin = Actor::admin("ops-1").unwrap();

    for _ in 0..20 {
        let temp = TempDir::new().unwrap();
        let services = with_paris(
            TerritoryDb::open(temp.path(), Duration::from_secs(5)).unwrap(),
            &["a"],
        );

        let barrier = Arc::new(Barrier::new(2));
        let claim = {
            let allocation = services.allocation.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                allocation.claim("paris", "a", &Actor::SelfRegistration, "race")
            })
        };
        let void = {
            let allocation = services.allocation.clone();
            let barrier = barrier.clone();
            let admin = admin.clone();
            thread::spawn(move || {
                barrier.wait();
                allocation.void_agent("a", &void_placement("a"), &admin, "race")
            })
        };
        let claimed = claim.join().unwrap();
        let voided = void.join().unwrap().expect("void must succeed");

        let actions: Vec<_> = services
            .audit
            .trail_for_agent("a", DEFAULT_TRAIL_LIMIT)
            .unwrap()
            .into_iter()
            .map(|r| r.action)
            .collect();
        match claimed {
            Ok(_) => {
                assert_eq!(voided.released_city_id.as_deref(), Some("paris"));
                assert_eq!(
                    actions,
                    vec![AssignmentAction::Claimed, AssignmentAction::Released, AssignmentAction::Voided]
                );
            }
            Err(TerritoryError::AgentVoided(_)) => {
                assert!(voided.released_city_id.is_none());
                assert_eq!(actions, vec![AssignmentAction::Voided]);
            }
            Err(e) => panic!("unexpected claim error: {:?}", e),
        }

        let a = services.registration.get_agent("a").unwrap();
        assert!(a.voided);
        assert!(a.territory.city_id().is_none());
        assert!(services.catalog.get("paris").unwrap().owner_id.is_none());
    }
}
