use std::sync::Arc;

use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{QuotaCost, QuotaRecord, QuotaStatus, SubscriptionTier, TierLimitTable};
use crate::repositories::QuotaStore;

/// 同時更新で CAS に負けた場合の読み直し上限
const MAX_ATTEMPTS: usize = 4;

/// 利用枠台帳
///
/// アカウントごとにリクエスト数・トークン数の時間枠を管理する。
/// ウィンドウのリセットはバックグラウンドではなく読み取り時に行い、結果を永続化する。
#[derive(Clone)]
pub struct QuotaLedger {
    store: Arc<dyn QuotaStore>,
    limits: TierLimitTable,
    window: Duration,
}

impl QuotaLedger {
    /// 新しい QuotaLedger を作成
    pub fn new(store: Arc<dyn QuotaStore>, limits: TierLimitTable, window: Duration) -> Self {
        Self {
            store,
            limits,
            window,
        }
    }

    /// 現在の利用状況を取得（期限切れならリセットしてから返す）
    pub async fn status(
        &self,
        account_id: Uuid,
        tier: SubscriptionTier,
    ) -> Result<QuotaStatus, AppError> {
        self.status_at(account_id, tier, OffsetDateTime::now_utc())
            .await
    }

    pub async fn status_at(
        &self,
        account_id: Uuid,
        tier: SubscriptionTier,
        now: OffsetDateTime,
    ) -> Result<QuotaStatus, AppError> {
        let record = self.settled_record(account_id, tier, now).await?;
        Ok(record.status(tier))
    }

    /// 利用枠を消費
    ///
    /// リクエスト数・トークン数の両方が足りる場合のみ減算する。
    /// 足りなければ `AppError::QuotaExceeded` を返し、状態は変更しない。
    pub async fn try_consume(
        &self,
        account_id: Uuid,
        tier: SubscriptionTier,
        cost: QuotaCost,
    ) -> Result<QuotaStatus, AppError> {
        self.try_consume_at(account_id, tier, cost, OffsetDateTime::now_utc())
            .await
    }

    pub async fn try_consume_at(
        &self,
        account_id: Uuid,
        tier: SubscriptionTier,
        cost: QuotaCost,
        now: OffsetDateTime,
    ) -> Result<QuotaStatus, AppError> {
        for _ in 0..MAX_ATTEMPTS {
            let record = self.settled_record(account_id, tier, now).await?;

            if !record.can_afford(cost) {
                tracing::debug!(
                    account_id = %account_id,
                    requests_remaining = record.requests_remaining,
                    tokens_remaining = record.tokens_remaining,
                    "利用上限超過"
                );
                return Err(AppError::QuotaExceeded(record.status(tier)));
            }

            // 減算は「同じウィンドウかつ残量が足りる」場合のみ成立する
            if let Some(updated) = self
                .store
                .consume_if_available(account_id, record.window_started_at, cost, now)
                .await?
            {
                return Ok(updated.status(tier));
            }
        }

        Err(contention(account_id))
    }

    /// ストアの疎通確認
    pub async fn ping(&self) -> Result<(), AppError> {
        self.store.ping().await?;
        Ok(())
    }

    /// レコードを取得し、保留中の遷移（ウィンドウ期限切れ・プラン変更）を適用する
    async fn settled_record(
        &self,
        account_id: Uuid,
        tier: SubscriptionTier,
        now: OffsetDateTime,
    ) -> Result<QuotaRecord, AppError> {
        let limits = self.limits.limits_for(tier);
        let seed = QuotaRecord::opened(account_id, limits, now);

        for _ in 0..MAX_ATTEMPTS {
            let record = self.store.find_or_create(&seed).await?;

            let Some(next) = record.next_state(limits, now, self.window) else {
                return Ok(record);
            };

            if let Some(applied) = self.store.replace_if_version(record.version, &next).await? {
                tracing::debug!(
                    account_id = %account_id,
                    window_started_at = %applied.window_started_at,
                    "利用枠ウィンドウを更新"
                );
                return Ok(applied);
            }
        }

        Err(contention(account_id))
    }
}

fn contention(account_id: Uuid) -> AppError {
    AppError::Internal(anyhow::anyhow!(
        "quota record for {account_id} kept changing under concurrent updates"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{TierLimits, WindowState};
    use crate::repositories::MemoryQuotaStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use time::macros::datetime;

    const T0: OffsetDateTime = datetime!(2026-03-01 12:00 UTC);

    fn limits() -> TierLimitTable {
        TierLimitTable {
            free: TierLimits {
                requests: 10,
                tokens: 100_000,
            },
            premium: TierLimits {
                requests: 100,
                tokens: 1_000_000,
            },
        }
    }

    fn ledger() -> (QuotaLedger, Arc<MemoryQuotaStore>) {
        let store = Arc::new(MemoryQuotaStore::new());
        let ledger = QuotaLedger::new(store.clone(), limits(), Duration::hours(1));
        (ledger, store)
    }

    fn cost(requests: i64, tokens: i64) -> QuotaCost {
        QuotaCost::new(requests, tokens).unwrap()
    }

    #[tokio::test]
    async fn test_status_creates_record_with_tier_defaults() {
        let (ledger, store) = ledger();
        let id = Uuid::new_v4();

        let status = ledger
            .status_at(id, SubscriptionTier::Free, T0)
            .await
            .unwrap();

        assert_eq!(status.requests_remaining, 10);
        assert_eq!(status.tokens_remaining, 100_000);
        assert_eq!(status.total_requests, 0);
        assert_eq!(status.last_reset, T0);
        assert!(!status.is_premium);
        assert!(store.get(id).await.is_some());
    }

    #[tokio::test]
    async fn test_consume_until_token_budget_runs_out() {
        let (ledger, store) = ledger();
        let id = Uuid::new_v4();
        let tier = SubscriptionTier::Free;

        for _ in 0..3 {
            ledger
                .try_consume_at(id, tier, cost(1, 40_000), T0)
                .await
                .unwrap();
        }
        let before = store.get(id).await.unwrap();
        assert_eq!(before.requests_remaining, 7);
        assert_eq!(before.tokens_remaining, 20_000);

        let result = ledger.try_consume_at(id, tier, cost(1, 25_000), T0).await;
        match result {
            Err(AppError::QuotaExceeded(status)) => {
                assert_eq!(status.requests_remaining, 7);
                assert_eq!(status.tokens_remaining, 20_000);
            }
            other => panic!("expected QuotaExceeded, got {other:?}"),
        }
        assert_eq!(store.get(id).await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_totals_track_granted_costs() {
        let (ledger, _) = ledger();
        let id = Uuid::new_v4();
        let tier = SubscriptionTier::Free;
        let costs = [(1, 10_000), (2, 5_000), (3, 70_000), (5, 1), (1, 14_999)];

        let mut granted_requests = 0;
        let mut granted_tokens = 0;
        for (requests, tokens) in costs {
            if ledger
                .try_consume_at(id, tier, cost(requests, tokens), T0)
                .await
                .is_ok()
            {
                granted_requests += requests;
                granted_tokens += tokens;
            }
        }

        let status = ledger.status_at(id, tier, T0).await.unwrap();
        // (5, 1) はリクエスト数が足りず拒否される
        assert_eq!(granted_requests, 7);
        assert_eq!(status.total_requests, granted_requests);
        assert_eq!(status.total_tokens, granted_tokens);
        assert_eq!(status.tokens_used, granted_tokens);
        assert!(status.total_requests <= 10);
    }

    #[tokio::test]
    async fn test_expired_window_resets_on_read() {
        let (ledger, store) = ledger();
        let id = Uuid::new_v4();
        let tier = SubscriptionTier::Free;

        ledger
            .try_consume_at(id, tier, cost(10, 100_000), T0)
            .await
            .unwrap();
        assert!(matches!(
            ledger.try_consume_at(id, tier, cost(1, 0), T0).await,
            Err(AppError::QuotaExceeded(_))
        ));

        let later = T0 + Duration::hours(1);
        let stored = store.get(id).await.unwrap();
        assert_eq!(
            stored.window_state(later, Duration::hours(1)),
            WindowState::Expired
        );

        let status = ledger.status_at(id, tier, later).await.unwrap();
        assert_eq!(status.requests_remaining, 10);
        assert_eq!(status.tokens_remaining, 100_000);
        assert_eq!(status.last_reset, later);

        // 読み取り時のリセットは永続化される
        let stored = store.get(id).await.unwrap();
        assert_eq!(stored.window_started_at, later);
        assert_eq!(stored.total_requests, 0);
    }

    #[tokio::test]
    async fn test_consume_after_long_idle_resets_first() {
        let (ledger, _) = ledger();
        let id = Uuid::new_v4();
        let tier = SubscriptionTier::Free;

        ledger
            .try_consume_at(id, tier, cost(9, 0), T0)
            .await
            .unwrap();

        let much_later = T0 + Duration::days(30);
        let status = ledger
            .try_consume_at(id, tier, cost(2, 0), much_later)
            .await
            .unwrap();
        assert_eq!(status.requests_remaining, 8);
        assert_eq!(status.last_reset, much_later);
    }

    #[tokio::test]
    async fn test_upgrade_mid_window_keeps_usage() {
        let (ledger, _) = ledger();
        let id = Uuid::new_v4();

        ledger
            .try_consume_at(id, SubscriptionTier::Free, cost(10, 1_000), T0)
            .await
            .unwrap();

        let status = ledger
            .try_consume_at(
                id,
                SubscriptionTier::Premium,
                cost(1, 1_000),
                T0 + Duration::minutes(5),
            )
            .await
            .unwrap();
        assert!(status.is_premium);
        assert_eq!(status.total_requests, 11);
        assert_eq!(status.requests_remaining, 89);
        assert_eq!(status.last_reset, T0);
    }

    #[tokio::test]
    async fn test_accounts_are_independent() {
        let (ledger, _) = ledger();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let tier = SubscriptionTier::Free;

        ledger
            .try_consume_at(a, tier, cost(10, 0), T0)
            .await
            .unwrap();
        let status = ledger
            .try_consume_at(b, tier, cost(1, 0), T0)
            .await
            .unwrap();
        assert_eq!(status.requests_remaining, 9);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_consumers_never_overcommit() {
        let (ledger, store) = ledger();
        let id = Uuid::new_v4();

        let handles: Vec<_> = (0..25)
            .map(|_| {
                let ledger = ledger.clone();
                tokio::spawn(async move {
                    ledger
                        .try_consume_at(id, SubscriptionTier::Free, cost(1, 30_000), T0)
                        .await
                })
            })
            .collect();

        let mut granted = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => granted += 1,
                Err(AppError::QuotaExceeded(_)) => {}
                Err(e) => panic!("unexpected error: {e:?}"),
            }
        }

        // トークン 100_000 に対して 30_000 ずつ → 3件のみ成立
        assert_eq!(granted, 3);
        let record = store.get(id).await.unwrap();
        assert_eq!(record.total_tokens, 90_000);
        assert_eq!(record.tokens_remaining, 10_000);
        assert_eq!(record.requests_remaining, 7);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_consumers_share_one_rollover() {
        let (ledger, store) = ledger();
        let id = Uuid::new_v4();
        let tier = SubscriptionTier::Free;

        ledger
            .try_consume_at(id, tier, cost(10, 0), T0)
            .await
            .unwrap();

        // 全員が同じ期限切れレコードを読み、同時にリセットを試みる
        let later = T0 + Duration::hours(1);
        let handles: Vec<_> = (0..25)
            .map(|_| {
                let ledger = ledger.clone();
                tokio::spawn(async move { ledger.try_consume_at(id, tier, cost(1, 0), later).await })
            })
            .collect();

        let mut granted = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => granted += 1,
                Err(AppError::QuotaExceeded(_)) => {}
                Err(e) => panic!("unexpected error: {e:?}"),
            }
        }

        assert_eq!(granted, 10);
        let record = store.get(id).await.unwrap();
        assert_eq!(record.window_started_at, later);
        assert_eq!(record.requests_remaining, 0);
        assert_eq!(record.total_requests, 10);
        // 作成(0) → 消費(1) → リセット1回(2) → 消費10回(12)
        assert_eq!(record.version, 12);
    }

    /// 条件付き更新が常に競合に負けるストア
    struct ChurningStore {
        record: QuotaRecord,
        attempts: AtomicUsize,
    }

    impl ChurningStore {
        fn new(window_started_at: OffsetDateTime) -> Self {
            let limits = limits().limits_for(SubscriptionTier::Free);
            Self {
                record: QuotaRecord::opened(Uuid::new_v4(), limits, window_started_at),
                attempts: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl QuotaStore for ChurningStore {
        async fn find_or_create(&self, _: &QuotaRecord) -> Result<QuotaRecord, sqlx::Error> {
            Ok(self.record.clone())
        }

        async fn replace_if_version(
            &self,
            _: i64,
            _: &QuotaRecord,
        ) -> Result<Option<QuotaRecord>, sqlx::Error> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        }

        async fn consume_if_available(
            &self,
            _: Uuid,
            _: OffsetDateTime,
            _: QuotaCost,
            _: OffsetDateTime,
        ) -> Result<Option<QuotaRecord>, sqlx::Error> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        }

        async fn ping(&self) -> Result<(), sqlx::Error> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_rollover_that_never_lands_is_internal_error() {
        let store = Arc::new(ChurningStore::new(T0 - Duration::hours(2)));
        let ledger = QuotaLedger::new(store.clone(), limits(), Duration::hours(1));

        let result = ledger
            .status_at(store.record.account_id, SubscriptionTier::Free, T0)
            .await;
        assert!(matches!(result, Err(AppError::Internal(_))));
        assert_eq!(store.attempts.load(Ordering::SeqCst), MAX_ATTEMPTS);
    }

    #[tokio::test]
    async fn test_consume_that_never_lands_is_internal_error() {
        let store = Arc::new(ChurningStore::new(T0));
        let ledger = QuotaLedger::new(store.clone(), limits(), Duration::hours(1));

        let result = ledger
            .try_consume_at(store.record.account_id, SubscriptionTier::Free, cost(1, 1), T0)
            .await;
        assert!(matches!(result, Err(AppError::Internal(_))));
        assert_eq!(store.attempts.load(Ordering::SeqCst), MAX_ATTEMPTS);
    }

    struct UnavailableStore;

    #[async_trait]
    impl QuotaStore for UnavailableStore {
        async fn find_or_create(&self, _: &QuotaRecord) -> Result<QuotaRecord, sqlx::Error> {
            Err(sqlx::Error::PoolTimedOut)
        }

        async fn replace_if_version(
            &self,
            _: i64,
            _: &QuotaRecord,
        ) -> Result<Option<QuotaRecord>, sqlx::Error> {
            Err(sqlx::Error::PoolTimedOut)
        }

        async fn consume_if_available(
            &self,
            _: Uuid,
            _: OffsetDateTime,
            _: QuotaCost,
            _: OffsetDateTime,
        ) -> Result<Option<QuotaRecord>, sqlx::Error> {
            Err(sqlx::Error::PoolTimedOut)
        }

        async fn ping(&self) -> Result<(), sqlx::Error> {
            Err(sqlx::Error::PoolTimedOut)
        }
    }

    #[tokio::test]
    async fn test_store_failure_propagates() {
        let ledger = QuotaLedger::new(Arc::new(UnavailableStore), limits(), Duration::hours(1));
        let result = ledger
            .try_consume_at(Uuid::new_v4(), SubscriptionTier::Free, cost(1, 1), T0)
            .await;
        assert!(matches!(result, Err(AppError::Database(_))));
        assert!(ledger.ping().await.is_err());
    }
}
