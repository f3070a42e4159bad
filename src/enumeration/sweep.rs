//! Periodic removal of expired enumeration contexts.

use std::{sync::Arc, time::Duration};

use log::debug;
use tokio::{
    select,
    time::{Instant, MissedTickBehavior, interval_at},
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use super::EnumerationContexts;

/// Spawn a task on `tracker` that sweeps `contexts` every `period` until
/// `shutdown` is cancelled.
pub fn spawn_sweeper(
    contexts: Arc<EnumerationContexts>,
    period: Duration,
    shutdown: CancellationToken,
    tracker: &TaskTracker,
) {
    tracker.spawn(async move {
        let mut ticks = interval_at(Instant::now() + period, period);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            select! {
                biased;

                () = shutdown.cancelled() => break,
                now = ticks.tick() => {
                    let swept = contexts.sweep(now);
                    if swept > 0 {
                        debug!("swept {swept} expired enumeration contexts");
                    }
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        encoder::SoapEncoder,
        enumeration::OpenEnumeration,
        epr::{EndpointReference, class_resource_uri},
        request::{EnumerateParams, EnumerationMode, Operation, Request},
        response::EnumerationItem,
        value::WsmInstance,
    };

    #[tokio::test(start_paused = true)]
    async fn sweeper_removes_expired_contexts_without_traffic() {
        let contexts = Arc::new(EnumerationContexts::new());
        let request = Request::new(
            "uuid:e",
            "alice",
            EndpointReference::new("http://h/wsman", class_resource_uri("CIM_Item")),
            Operation::Enumerate(EnumerateParams::default()),
        );
        contexts
            .open(
                &request,
                OpenEnumeration {
                    mode: EnumerationMode::Objects,
                    lifetime: Duration::from_secs(5),
                    first_page: 0,
                    report_total: false,
                    items: vec![EnumerationItem::Object(WsmInstance::new("CIM_Item"))],
                },
                &SoapEncoder,
                usize::MAX,
            )
            .expect("opens");

        let shutdown = CancellationToken::new();
        let tracker = TaskTracker::new();
        spawn_sweeper(Arc::clone(&contexts), Duration::from_secs(2), shutdown.clone(), &tracker);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(contexts.len(), 1);
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(contexts.is_empty());

        shutdown.cancel();
        tracker.close();
        tracker.wait().await;
    }
}
