use std::sync::Arc;

use tag_reputation::gate::Phase;
use tag_reputation::registry::{create_tag, register_user, update_tag_settings};
use tag_reputation::{EngineConfig, EngineError, ManualClock, MemoryStore, ReputationEngine, TagSettings, Timestamp, VoteValue};

const EPS: f64 = 1e-9;

#[test]
fn steady_flow_demo() {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(Timestamp(1_700_000_000_000_000_000)));
    let engine = ReputationEngine::new(store.clone(), clock.clone(), EngineConfig::default());

    let v = register_user(store.as_ref(), "victor", "Victor", None).unwrap();
    let t = register_user(store.as_ref(), "tess", "Tess", None).unwrap();
    let w = register_user(store.as_ref(), "wanda", "Wanda", None).unwrap();
    let x = register_user(store.as_ref(), "xavier", "Xavier", None).unwrap();

    // two voters end the bootstrap; one bootstrap vote is worth 9.9
    let settings = TagSettings {
        reputation_threshold: 10.0,
        vote_reward: 9.9,
        min_users_for_threshold: 2,
        ..TagSettings::default()
    };
    let tag = create_tag(store.as_ref(), v.key, "chess", "", settings.clone()).unwrap();

    // 1. V votes first and is rewarded while the tag bootstraps
    let first = engine.cast_vote(v.key, t.key, tag.key, VoteValue::Up).unwrap();
    assert!((first.weight - 9.9).abs() < EPS);
    assert_eq!(engine.phase(tag.key).unwrap(), Phase::Bootstrap);

    // 2. W's vote is the second voter: the tag turns steady
    clock.advance_secs(60);
    let second = engine.cast_vote(w.key, x.key, tag.key, VoteValue::Up).unwrap();
    assert_eq!(engine.phase(tag.key).unwrap(), Phase::Steady);
    assert_eq!(second.weight, 0.0, "9.9 is under the threshold once steady");

    // 3. V sits at 9.9, below 10: no power, no weight
    let rep_v = engine.get_or_refresh_reputation(v.key, tag.key).unwrap();
    println!("V in steady phase = {:?}", rep_v);
    assert!((rep_v.reputation_total_effective - 9.9).abs() < EPS);
    assert!(!rep_v.has_voting_power);
    assert_eq!(rep_v.vote_weight, 0.0);

    // 4. ...and V's vote, cast with a 9.9 snapshot, now counts for nothing
    let rep_t = engine.get_or_refresh_reputation(t.key, tag.key).unwrap();
    assert_eq!(rep_t.reputation_basis, 0.0);
    let rep_x = engine.get_or_refresh_reputation(x.key, tag.key).unwrap();
    assert_eq!(rep_x.reputation_basis, 0.0);

    // the records themselves stay on file
    assert_eq!(engine.votes_by(v.key, tag.key).unwrap().len(), 1);

    // 5. the creator lowers the threshold; the tag's new version makes every
    // cached reputation stale and V's vote counts again
    let lowered = TagSettings { reputation_threshold: 9.0, ..settings };
    assert!(matches!(
        update_tag_settings(store.as_ref(), tag.key, w.key, lowered.clone()),
        Err(EngineError::NotTagCreator { .. })
    ));
    update_tag_settings(store.as_ref(), tag.key, v.key, lowered).unwrap();

    let rep_v = engine.get_or_refresh_reputation(v.key, tag.key).unwrap();
    assert!(rep_v.has_voting_power);
    assert!((rep_v.vote_weight - 9.9).abs() < EPS);

    let rep_t = engine.get_or_refresh_reputation(t.key, tag.key).unwrap();
    println!("T after threshold change = {:?}", rep_t);
    assert!((rep_t.reputation_basis - 1.5 * 9.9).abs() < EPS);
}

#[test]
fn retracting_back_into_bootstrap_restores_power() {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(Timestamp(1_700_000_000_000_000_000)));
    let engine = ReputationEngine::new(store.clone(), clock.clone(), EngineConfig::default());

    let a = register_user(store.as_ref(), "ann", "Ann", None).unwrap();
    let b = register_user(store.as_ref(), "ben", "Ben", None).unwrap();
    let c = register_user(store.as_ref(), "cat", "Cat", None).unwrap();
    let settings = TagSettings { min_users_for_threshold: 2, ..TagSettings::default() };
    let tag = create_tag(store.as_ref(), a.key, "go", "", settings).unwrap();

    engine.cast_vote(a.key, b.key, tag.key, VoteValue::Up).unwrap();
    clock.advance_secs(60);
    engine.cast_vote(c.key, b.key, tag.key, VoteValue::Up).unwrap();

    let rep_a = engine.get_or_refresh_reputation(a.key, tag.key).unwrap();
    assert!(!rep_a.has_voting_power, "0.1 is far below the default threshold of 10");

    // C withdraws, only one voter remains: back to bootstrap for everyone
    clock.advance_secs(60);
    assert!(engine.retract_vote(c.key, b.key, tag.key).unwrap());
    assert_eq!(engine.phase(tag.key).unwrap(), Phase::Bootstrap);

    let rep_a = engine.get_or_refresh_reputation(a.key, tag.key).unwrap();
    assert!(rep_a.has_voting_power);
    assert!((rep_a.vote_weight - 0.1).abs() < EPS);
}

#[test]
fn early_retraction_moves_rewards_of_later_voters() {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(Timestamp(1_700_000_000_000_000_000)));
    // records never expire by age here, so only invalidation refreshes them
    let config = EngineConfig { max_age_secs: 0, ..EngineConfig::default() };
    let engine = ReputationEngine::new(store.clone(), clock.clone(), config);

    let a = register_user(store.as_ref(), "ann", "Ann", None).unwrap();
    let b = register_user(store.as_ref(), "ben", "Ben", None).unwrap();
    let c = register_user(store.as_ref(), "cat", "Cat", None).unwrap();
    let d = register_user(store.as_ref(), "dan", "Dan", None).unwrap();
    let settings = TagSettings { min_users_for_threshold: 2, ..TagSettings::default() };
    let tag = create_tag(store.as_ref(), a.key, "go", "", settings).unwrap();

    // 1. A and B are the first two voters; C comes too late for a reward
    engine.cast_vote(a.key, b.key, tag.key, VoteValue::Up).unwrap();
    clock.advance_secs(60);
    engine.cast_vote(b.key, c.key, tag.key, VoteValue::Up).unwrap();
    clock.advance_secs(60);
    engine.cast_vote(c.key, d.key, tag.key, VoteValue::Up).unwrap();
    let rep_c = engine.get_or_refresh_reputation(c.key, tag.key).unwrap();
    assert_eq!(rep_c.reputation_rewards, 0.0);

    // 2. A withdraws: B and C are now the first two voters, still steady
    clock.advance_secs(60);
    assert!(engine.retract_vote(a.key, b.key, tag.key).unwrap());
    assert_eq!(engine.phase(tag.key).unwrap(), Phase::Steady);

    let rep_c = engine.get_or_refresh_reputation(c.key, tag.key).unwrap();
    println!("C rewards after A's retraction = {}", rep_c.reputation_rewards);
    assert!((rep_c.reputation_rewards - 0.1).abs() < EPS);
    let rep_a = engine.get_or_refresh_reputation(a.key, tag.key).unwrap();
    assert_eq!(rep_a.reputation_rewards, 0.0);
}

#[test]
fn losing_power_refreshes_the_targets() {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(Timestamp(1_700_000_000_000_000_000)));
    let config = EngineConfig { max_age_secs: 0, ..EngineConfig::default() };
    let engine = ReputationEngine::new(store.clone(), clock.clone(), config);

    let w = register_user(store.as_ref(), "wanda", "Wanda", None).unwrap();
    let v = register_user(store.as_ref(), "victor", "Victor", None).unwrap();
    let z = register_user(store.as_ref(), "zoe", "Zoe", None).unwrap();
    let t = register_user(store.as_ref(), "tess", "Tess", None).unwrap();
    let settings = TagSettings {
        reputation_threshold: 10.0,
        vote_reward: 8.0,
        min_users_for_threshold: 2,
        ..TagSettings::default()
    };
    let tag = create_tag(store.as_ref(), w.key, "chess", "", settings).unwrap();

    // 1. W votes twice while alone (16 in rewards), V's vote ends the bootstrap
    engine.cast_vote(w.key, v.key, tag.key, VoteValue::Up).unwrap();
    clock.advance_secs(60);
    engine.cast_vote(w.key, z.key, tag.key, VoteValue::Up).unwrap();
    clock.advance_secs(60);
    let vt = engine.cast_vote(v.key, t.key, tag.key, VoteValue::Up).unwrap();
    assert_eq!(engine.phase(tag.key).unwrap(), Phase::Steady);

    // V: 1.5 * 8 / 2 received + 8 rewarded = 14, above the threshold
    assert!((vt.weight - 14.0).abs() < EPS);
    let rep_t = engine.get_or_refresh_reputation(t.key, tag.key).unwrap();
    assert!((rep_t.reputation_basis - 1.5 * 14.0).abs() < EPS);

    // 2. four months on, W's vote decays to 0.25 and V drops to 9
    clock.advance_months(4.0);
    engine.invalidate(v.key, tag.key).unwrap();
    let rep_v = engine.get_or_refresh_reputation(v.key, tag.key).unwrap();
    assert!((rep_v.reputation_total_effective - 9.0).abs() < EPS);
    assert!(!rep_v.has_voting_power);

    // 3. T is recomputed without V's vote instead of keeping its old value
    let report = engine.refresh(t.key, tag.key).unwrap();
    println!("T after V lost power = {:?}", report);
    assert!(report.recomputed);
    assert_eq!(report.reputation.reputation_basis, 0.0);
}
