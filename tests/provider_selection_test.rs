//! Provider ranking, availability filtering and fallback

mod support;

use notify_gateway::config::{ProviderEntry, ProvidersConfig};
use notify_gateway::models::Channel;
use notify_gateway::providers::selector::provider_score;
use notify_gateway::providers::ProviderSelector;
use notify_gateway::GatewayError;
use proptest::prelude::*;
use support::{health_monitor, init_tracing};

fn sms(entries: Vec<ProviderEntry>) -> ProvidersConfig {
    ProvidersConfig::default().with_channel(Channel::Sms, entries)
}

#[tokio::test]
async fn test_latency_bonus_can_outrank_priority() {
    init_tracing();
    let (monitor, _, _) = health_monitor();
    monitor.record_success("alpha", 1000).await;
    monitor.record_success("bravo", 200).await;

    let selector = ProviderSelector::new(
        sms(vec![ProviderEntry::new("alpha", 50), ProviderEntry::new("bravo", 80)]),
        monitor,
    );

    let ranked = selector.available_providers(Channel::Sms, &[]).await;
    assert_eq!(ranked.len(), 2);
    assert_eq!(ranked[0].id, "bravo");
    assert!((ranked[0].score - 85.0).abs() < f64::EPSILON);
    assert!((ranked[1].score - 51.0).abs() < f64::EPSILON);

    assert_eq!(selector.select(Channel::Sms).await.unwrap(), "bravo");
}

#[tokio::test]
async fn test_equal_scores_keep_configuration_order() {
    let (monitor, _, _) = health_monitor();
    let selector = ProviderSelector::new(
        sms(vec![ProviderEntry::new("first", 70), ProviderEntry::new("second", 70)]),
        monitor,
    );
    assert_eq!(selector.select(Channel::Sms).await.unwrap(), "first");
}

#[tokio::test]
async fn test_disabled_and_open_providers_are_skipped() {
    let (monitor, _, _) = health_monitor();
    for _ in 0..5 {
        monitor.record_failure("beem", "HTTP 503").await;
    }
    let selector = ProviderSelector::new(
        sms(vec![
            ProviderEntry::new("beem", 90),
            ProviderEntry::new("twilio", 85).disabled(),
            ProviderEntry::new("termii", 60),
        ]),
        monitor,
    );

    assert!(!selector.is_available("beem").await);
    assert_eq!(selector.select(Channel::Sms).await.unwrap(), "termii");
    assert_eq!(
        selector
            .select_excluding(Channel::Sms, &["termii".to_string()])
            .await
            .unwrap(),
        Some("beem".to_string())
    );
}

#[tokio::test]
async fn test_fallback_picks_the_longest_recovered_provider() {
    let (monitor, _, clock) = health_monitor();
    for _ in 0..5 {
        monitor.record_failure("termii", "HTTP 500").await;
    }
    clock.advance_secs(10);
    for _ in 0..5 {
        monitor.record_failure("beem", "HTTP 500").await;
    }

    let selector = ProviderSelector::new(
        sms(vec![ProviderEntry::new("beem", 90), ProviderEntry::new("termii", 60)]),
        monitor,
    );

    assert!(selector.available_providers(Channel::Sms, &[]).await.is_empty());
    assert_eq!(selector.select(Channel::Sms).await.unwrap(), "termii");
}

#[tokio::test]
async fn test_channel_without_enabled_providers_has_no_selection() {
    let (monitor, _, _) = health_monitor();
    let selector = ProviderSelector::new(
        ProvidersConfig::default()
            .with_channel(Channel::Email, vec![ProviderEntry::new("mailgun", 80).disabled()]),
        monitor,
    );

    assert!(matches!(
        selector.select(Channel::Email).await,
        Err(GatewayError::NoProviderAvailable { .. })
    ));
    assert!(matches!(
        selector.select(Channel::Whatsapp).await,
        Err(GatewayError::NoProviderAvailable { .. })
    ));
}

#[tokio::test]
async fn test_exhausted_exclusions_return_none() {
    let (monitor, _, _) = health_monitor();
    let selector = ProviderSelector::new(sms(vec![ProviderEntry::new("beem", 90)]), monitor);

    let choice = selector
        .select_excluding(Channel::Sms, &["beem".to_string()])
        .await
        .unwrap();
    assert_eq!(choice, None);
}

proptest! {
    #[test]
    fn score_never_drops_below_priority(priority in -1000i64..1000, latency in 0.0f64..100_000.0) {
        let score = provider_score(priority, latency);
        prop_assert!(score > priority as f64);
        prop_assert!(score <= priority as f64 + 1000.0);
    }

    #[test]
    fn faster_provider_scores_higher_at_equal_priority(
        priority in 0i64..100,
        fast in 1.0f64..5_000.0,
        extra in 1.0f64..5_000.0,
    ) {
        prop_assert!(provider_score(priority, fast) > provider_score(priority, fast + extra));
    }

    #[test]
    fn sub_millisecond_latency_is_clamped(priority in 0i64..100, latency in 0.0f64..1.0) {
        prop_assert_eq!(provider_score(priority, latency), provider_score(priority, 1.0));
    }
}
