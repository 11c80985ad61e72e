//! Background drain task.
//!
//! Wakes on the flush interval or when a local write signals the engine, and
//! runs [`SyncEngine::process_local_operations`]. A wake-up that arrives while
//! a drain is running is kept as a permit, so the next loop iteration drains
//! again instead of losing the trigger. When a reconcile interval is set the
//! same task also runs periodic full refreshes.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, Interval, MissedTickBehavior};

use super::{FlushOutcome, SyncEngine};

enum Trigger {
    Flush,
    Reconcile,
}

fn ticker(period: Duration) -> Interval {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

async fn tick_if_set(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

pub(super) fn spawn(engine: &Arc<SyncEngine>) -> JoinHandle<()> {
    let weak = Arc::downgrade(engine);
    let wake = Arc::clone(&engine.wake);
    let mut shutdown = engine.shutdown.subscribe();
    let config = engine.config.clone();

    tokio::spawn(async move {
        let mut flush_ticker = ticker(config.flush_interval);
        let mut reconcile_ticker = config.reconcile_interval.map(|period| {
            let mut t = ticker(period);
            t.reset();
            t
        });

        loop {
            if *shutdown.borrow() {
                break;
            }

            let trigger = tokio::select! {
                _ = shutdown.changed() => break,
                _ = flush_ticker.tick() => Trigger::Flush,
                _ = wake.notified() => Trigger::Flush,
                _ = tick_if_set(&mut reconcile_ticker) => Trigger::Reconcile,
            };

            let Some(engine) = upgrade(&weak) else {
                break;
            };

            if let Trigger::Reconcile = trigger {
                if engine.connectivity.is_reachable().await {
                    if let Err(e) = engine.sync_all_tables_from_remote().await {
                        tracing::error!("Periodic refresh failed: {}", e);
                    }
                }
            }

            match engine.process_local_operations().await {
                Ok(FlushOutcome::Interrupted { error, .. }) => {
                    tracing::debug!("Flush will retry on next tick: {}", error);
                }
                Ok(_) => {}
                Err(e) => tracing::error!("Flush failed: {}", e),
            }
        }

        tracing::debug!("Flush scheduler stopped");
    })
}

fn upgrade(weak: &Weak<SyncEngine>) -> Option<Arc<SyncEngine>> {
    weak.upgrade().filter(|engine| !engine.is_disposed())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::RemoteCall;
    use crate::sync::test_support::{group_row, wait_until, TestEngine};
    use crate::sync::EngineConfig;
    use crate::table::SyncTable;

    #[tokio::test]
    async fn test_interval_drains_queue() {
        let t = TestEngine::with_config(EngineConfig {
            flush_interval: Duration::from_millis(100),
            ..EngineConfig::default()
        })
        .await;
        t.connectivity.set_online(false);
        t.engine
            .insert(SyncTable::Groups, "g1", group_row("g1", "Trip"))
            .await
            .unwrap();

        let task = spawn(&t.engine);
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(t.remote.writes().is_empty());

        t.connectivity.set_online(true);
        let remote = Arc::clone(&t.remote);
        wait_until(|| {
            let remote = Arc::clone(&remote);
            async move { !remote.writes().is_empty() }
        })
        .await;
        assert_eq!(
            t.remote.writes(),
            vec![RemoteCall::Insert(SyncTable::Groups, "g1".into())]
        );
        task.abort();
    }

    #[tokio::test]
    async fn test_periodic_reconcile() {
        let t = TestEngine::with_config(EngineConfig {
            flush_interval: Duration::from_secs(3600),
            reconcile_interval: Some(Duration::from_millis(100)),
            ..EngineConfig::default()
        })
        .await;
        t.remote.seed(SyncTable::Groups, group_row("g1", "Remote"));

        let task = spawn(&t.engine);
        let engine = Arc::clone(&t.engine);
        wait_until(|| {
            let engine = Arc::clone(&engine);
            async move { engine.get_row(SyncTable::Groups, "g1").await.unwrap().is_some() }
        })
        .await;
        task.abort();
    }

    #[tokio::test]
    async fn test_stops_when_engine_disposed() {
        let t = TestEngine::new().await;
        let task = spawn(&t.engine);
        t.engine.dispose();
        t.engine.request_flush();

        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
    }
}
