mod common;

use chrono::Utc;
use common::{nfl_game, Harness, GAME_ID};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio_test::{assert_err, assert_ok};
use wagerd::domain::{AuditEventType, BetStatus, GameStatus, League, ModeKey, ResolutionOrigin, ScoringKind};
use wagerd::persistence::TransitionOutcome;

/// Two members back TD and FG on a 1.00 wager with a 30 second window; a
/// field goal after close settles it for the FG backer.
#[tokio::test]
async fn next_score_field_goal_pays_fg_backer() {
    let h = Harness::new().await;
    let td = h.member(dec!(10)).await;
    let fg = h.member(dec!(10)).await;

    h.source
        .set(nfl_game(GameStatus::InProgress, &[ScoringKind::Touchdown, ScoringKind::FieldGoal]));
    let provider = h.engine.feeds().get(League::Nfl).unwrap();
    provider.poll_once().await.unwrap();

    let wager = h
        .open_elapsed(ModeKey::NflNextScore, dec!(1.00), serde_json::json!({}))
        .await;
    h.guess(&wager, td, "TD").await;
    h.guess(&wager, fg, "fg").await;

    // Close timer fires
    h.drain().await;
    assert_eq!(h.wager(wager.id).await.status, BetStatus::Pending);
    for user in [td, fg] {
        let b = h.balance(user).await;
        assert_eq!(b.available, dec!(9.00));
        assert_eq!(b.contingent, dec!(2.00));
        assert_eq!(b.net, Decimal::ZERO);
    }

    let baseline = h.engine.capture_baseline(wager.id).await.unwrap();
    assert!(baseline.is_some());

    h.source.set(nfl_game(
        GameStatus::InProgress,
        &[ScoringKind::Touchdown, ScoringKind::FieldGoal, ScoringKind::FieldGoal],
    ));
    provider.poll_once().await.unwrap();
    let game = provider.snapshots().get(League::Nfl, GAME_ID).unwrap();

    let validator = h
        .engine
        .kernel(League::Nfl)
        .and_then(|k| k.validator(ModeKey::NflNextScore))
        .unwrap();
    assert_eq!(validator.on_game_update(&game).await.unwrap(), 1);
    h.drain().await;

    let settled = h.wager(wager.id).await;
    assert_eq!(settled.status, BetStatus::Resolved);
    assert_eq!(settled.winning_choice.as_deref(), Some("FG"));

    let loser = h.balance(td).await;
    assert_eq!(loser.available, dec!(9.00));
    assert_eq!(loser.contingent, Decimal::ZERO);
    assert_eq!(loser.net, dec!(-1.00));

    let winner = h.balance(fg).await;
    assert_eq!(winner.available, dec!(11.00));
    assert_eq!(winner.contingent, Decimal::ZERO);
    assert_eq!(winner.net, dec!(1.00));

    let trail = h.engine.wagers().audit_trail(wager.id).await.unwrap();
    for expected in [
        AuditEventType::StatusTransition,
        AuditEventType::BaselineCaptured,
        AuditEventType::ModeResultComputed,
        AuditEventType::PayoutApplied,
    ] {
        assert!(
            trail.iter().any(|e| e.event_type == expected),
            "missing {} in audit trail",
            expected
        );
    }
}

#[tokio::test]
async fn single_distinct_guess_washes_at_close() {
    let h = Harness::new().await;
    let a = h.member(dec!(5)).await;
    let b = h.member(dec!(5)).await;

    let wager = h
        .open_elapsed(
            ModeKey::U2Pick,
            dec!(2.00),
            serde_json::json!({"choices": ["Rain", "Shine"]}),
        )
        .await;
    h.guess(&wager, a, "Rain").await;
    h.guess(&wager, b, "rain").await;

    h.drain().await;

    let washed = h.wager(wager.id).await;
    assert_eq!(washed.status, BetStatus::Washed);
    for user in [a, b] {
        let balance = h.balance(user).await;
        assert_eq!(balance.available, dec!(5));
        assert_eq!(balance.contingent, Decimal::ZERO);
        assert_eq!(balance.net, Decimal::ZERO);
    }
}

#[tokio::test]
async fn wash_of_pending_bet_restores_every_balance() {
    let h = Harness::new().await;
    let users = [h.member(dec!(20)).await, h.member(dec!(20)).await, h.member(dec!(20)).await];

    let wager = h
        .open_elapsed(
            ModeKey::U2Pick,
            dec!(3.33),
            serde_json::json!({"choices": ["A", "B", "C"]}),
        )
        .await;
    for (user, guess) in users.iter().zip(["A", "B", "B"]) {
        h.guess(&wager, *user, guess).await;
    }
    h.drain().await;
    assert_eq!(h.wager(wager.id).await.status, BetStatus::Pending);

    let outcome = h
        .engine
        .ledger()
        .wash(wager.id, "game cancelled", Utc::now())
        .await
        .unwrap();
    assert_eq!(
        outcome,
        TransitionOutcome::Applied {
            from: BetStatus::Pending,
            to: BetStatus::Washed
        }
    );

    for user in users {
        let balance = h.balance(user).await;
        assert_eq!(balance.available, dec!(20));
        assert_eq!(balance.contingent, Decimal::ZERO);
        assert_eq!(balance.net, Decimal::ZERO);
    }
    assert!(h
        .engine
        .wagers()
        .audit_trail(wager.id)
        .await
        .unwrap()
        .iter()
        .any(|e| e.event_type == AuditEventType::WashRefundApplied));
}

#[tokio::test]
async fn resolution_is_idempotent_and_conserves_funds() {
    let h = Harness::new().await;
    let users = [h.member(dec!(1)).await, h.member(dec!(1)).await, h.member(dec!(1)).await];

    // Pot 0.03 split between two winners leaves one odd cent
    let wager = h
        .open_elapsed(
            ModeKey::U2Pick,
            dec!(0.01),
            serde_json::json!({"choices": ["Yes", "No"]}),
        )
        .await;
    for (user, guess) in users.iter().zip(["Yes", "Yes", "No"]) {
        h.guess(&wager, *user, guess).await;
    }
    h.drain().await;

    let origin = ResolutionOrigin::Manual { actor: h.host };
    let first = h
        .engine
        .ledger()
        .resolve(wager.id, "Yes", &origin, Utc::now())
        .await
        .unwrap();
    assert!(first.is_applied());

    let before: Vec<_> = futures::future::join_all(users.iter().map(|u| h.balance(*u))).await;

    let again = h
        .engine
        .ledger()
        .resolve(wager.id, "No", &origin, Utc::now())
        .await
        .unwrap();
    assert_eq!(again, TransitionOutcome::AlreadySettled { status: BetStatus::Resolved });

    let after: Vec<_> = futures::future::join_all(users.iter().map(|u| h.balance(*u))).await;
    assert_eq!(before, after);

    let total: Decimal = after.iter().map(|b| b.available).sum();
    assert_eq!(total, dec!(3));
    assert!(after.iter().all(|b| b.contingent.is_zero()));
    let net: Decimal = after.iter().map(|b| b.net).sum();
    assert_eq!(net, Decimal::ZERO);
}

#[tokio::test]
async fn unchanged_game_is_not_reevaluated() {
    let h = Harness::new().await;
    let a = h.member(dec!(10)).await;
    let b = h.member(dec!(10)).await;

    h.source.set(nfl_game(GameStatus::InProgress, &[]));
    let provider = h.engine.feeds().get(League::Nfl).unwrap();
    provider.poll_once().await.unwrap();

    let wager = h
        .open_elapsed(ModeKey::NflNextScore, dec!(1), serde_json::json!({}))
        .await;
    h.guess(&wager, a, "TD").await;
    h.guess(&wager, b, "Safety").await;
    h.drain().await;
    h.engine.capture_baseline(wager.id).await.unwrap();
    h.drain().await;

    // Same data, fresh fetch time: the feed does not republish
    h.source.set(nfl_game(GameStatus::InProgress, &[]));
    let summary = provider.poll_once().await.unwrap();
    assert_eq!(summary.published, 0);

    let game = provider.snapshots().get(League::Nfl, GAME_ID).unwrap();
    let validator = h
        .engine
        .kernel(League::Nfl)
        .and_then(|k| k.validator(ModeKey::NflNextScore))
        .unwrap();
    assert_eq!(validator.on_game_update(&game).await.unwrap(), 0);
    // Second pass hits the signature gate
    assert_eq!(validator.on_game_update(&game).await.unwrap(), 0);

    let jobs = h.engine.queue().stats().await.unwrap();
    assert_eq!(jobs.queued, 0);
    assert_eq!(h.wager(wager.id).await.status, BetStatus::Pending);
}

#[tokio::test]
async fn first_manual_override_wins() {
    let h = Harness::new().await;
    let yes = h.member(dec!(10)).await;
    let no = h.member(dec!(10)).await;

    let wager = h
        .open_elapsed(
            ModeKey::U2Pick,
            dec!(2.50),
            serde_json::json!({"choices": ["Yes", "No"]}),
        )
        .await;
    h.guess(&wager, yes, "Yes").await;
    h.guess(&wager, no, "No").await;
    h.drain().await;

    let wagers = h.engine.wagers();
    let first = assert_ok!(wagers.manual_override(wager.id, h.host, "yes", Utc::now()).await);
    assert!(!first.is_duplicate());
    let second = assert_ok!(wagers.manual_override(wager.id, h.host, "No", Utc::now()).await);
    assert!(second.is_duplicate());

    h.drain().await;

    let settled = h.wager(wager.id).await;
    assert_eq!(settled.status, BetStatus::Resolved);
    assert_eq!(settled.winning_choice.as_deref(), Some("Yes"));
    assert_eq!(h.balance(yes).await.available, dec!(12.50));
    assert_eq!(h.balance(no).await.available, dec!(7.50));

    let payouts = wagers
        .audit_trail(wager.id)
        .await
        .unwrap()
        .into_iter()
        .filter(|e| e.event_type == AuditEventType::PayoutApplied)
        .count();
    assert_eq!(payouts, 1);

    // Settled bets no longer accept overrides
    assert_err!(wagers.manual_override(wager.id, h.host, "No", Utc::now()).await);
}

#[tokio::test]
async fn cleared_baseline_is_recaptured_from_current_game() {
    let h = Harness::new().await;
    let a = h.member(dec!(10)).await;
    let b = h.member(dec!(10)).await;

    h.source.set(nfl_game(GameStatus::InProgress, &[ScoringKind::Touchdown]));
    let provider = h.engine.feeds().get(League::Nfl).unwrap();
    provider.poll_once().await.unwrap();

    let wager = h
        .open_elapsed(ModeKey::NflNextScore, dec!(1), serde_json::json!({}))
        .await;
    h.guess(&wager, a, "TD").await;
    h.guess(&wager, b, "FG").await;
    h.drain().await;

    let first = h.engine.capture_baseline(wager.id).await.unwrap().unwrap();
    // A second capture keeps the stored baseline
    let again = h.engine.capture_baseline(wager.id).await.unwrap().unwrap();
    assert_eq!(first.stats, again.stats);

    h.source.set(nfl_game(
        GameStatus::InProgress,
        &[ScoringKind::Touchdown, ScoringKind::Safety],
    ));
    provider.poll_once().await.unwrap();

    h.engine.clear_baseline(wager.id).await.unwrap();
    let fresh = h.engine.capture_baseline(wager.id).await.unwrap().unwrap();
    assert_ne!(first.stats, fresh.stats);
}
