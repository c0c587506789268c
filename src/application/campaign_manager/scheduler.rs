//! Campaign Manager (§4.G). A background scheduler running every 60s across
//! all live campaigns: expiration, rebalance cadence, and daily reset.
//! Grounded on the teacher's `application::system::shutdown_service`
//! supervised-background-service idiom and `application::bootstrap::services`
//! wiring pattern.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::application::campaign_engine::CampaignRobot;
use crate::domain::campaign::CampaignStatus;

pub struct CampaignManager {
    robots: tokio::sync::RwLock<HashMap<Uuid, Arc<CampaignRobot>>>,
    in_flight: tokio::sync::Mutex<HashSet<Uuid>>,
    overrun_count: AtomicU64,
}

impl Default for CampaignManager {
    fn default() -> Self {
        Self::new()
    }
}

impl CampaignManager {
    pub fn new() -> Self {
        Self {
            robots: tokio::sync::RwLock::new(HashMap::new()),
            in_flight: tokio::sync::Mutex::new(HashSet::new()),
            overrun_count: AtomicU64::new(0),
        }
    }

    pub async fn register(&self, campaign_id: Uuid, robot: Arc<CampaignRobot>) {
        self.robots.write().await.insert(campaign_id, robot);
    }

    pub async fn unregister(&self, campaign_id: Uuid) {
        self.robots.write().await.remove(&campaign_id);
    }

    /// Number of scheduled ticks skipped because the previous tick for that
    /// campaign was still running at the next 5s slot (§5 backpressure).
    pub fn overrun_count(&self) -> u64 {
        self.overrun_count.load(Ordering::Relaxed)
    }

    /// Drives every registered robot's 5-second tick. Intended to be called
    /// from a ticker loop; each campaign's tick is spawned independently so a
    /// slow campaign never blocks another (§5: ticks across campaigns are
    /// independent). A campaign whose previous tick has not yet finished is
    /// skipped rather than double-scheduled, and counted as an overrun.
    pub async fn run_all_ticks(&self) {
        let robots: Vec<(Uuid, Arc<CampaignRobot>)> =
            self.robots.read().await.iter().map(|(id, r)| (*id, r.clone())).collect();

        let mut due = Vec::with_capacity(robots.len());
        {
            let mut in_flight = self.in_flight.lock().await;
            for (id, robot) in robots {
                if in_flight.contains(&id) {
                    self.overrun_count.fetch_add(1, Ordering::Relaxed);
                    warn!(campaign_id = %id, "campaign tick overrun, previous tick still running");
                    continue;
                }
                in_flight.insert(id);
                due.push((id, robot));
            }
        }

        let mut handles = Vec::with_capacity(due.len());
        for (id, robot) in due {
            handles.push(tokio::spawn(async move {
                if let Err(e) = robot.tick().await {
                    tracing::error!(error = %e, "campaign tick failed");
                }
                id
            }));
        }
        for handle in handles {
            if let Ok(id) = handle.await {
                self.in_flight.lock().await.remove(&id);
            }
        }
    }

    /// One 60s scheduler pass (§4.G): expiration check, drawdown re-check
    /// (handled inside each tick already), rebalance cadence, daily reset.
    pub async fn run_scheduler_pass(&self) {
        let robots: Vec<Arc<CampaignRobot>> = self.robots.read().await.values().cloned().collect();
        for robot in robots {
            if robot.status().await == CampaignStatus::Active {
                robot.check_expiration_and_reset(Utc::now()).await;
            }
        }
        info!("campaign manager scheduler pass complete");
    }
}
