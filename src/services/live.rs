//! Live wagering session
//!
//! A single task that, for every new contest on the feed:
//! - refreshes the bankroll when it may have changed
//! - folds newly settled contests into the tier stats
//! - asks the consensus ensemble for a wager and sizes it for the mode
//! - places it (or logs it in dry-run mode)
//!
//! Feed, record-store and wager failures are counted by consecutive-failure
//! breakers; once any of them trips the session ends cleanly.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::adapters::{BankrollSource, LiveFeed, MatchMeta, RecordSource, WagerSubmitter};
use crate::config::BettingConfig;
use crate::coordination::{FailureBreaker, ShutdownFlag};
use crate::domain::{ContestRecord, Mode, StatsBook, Tier};
use crate::engine::features::{betting_vector, FeatureLayout, TierModel, TierModels};
use crate::engine::wager::Ensemble;
use crate::error::{DuelbetError, Result};
use crate::ml::DenseNetwork;

/// Size a wager for the contest mode.
///
/// `None` means the mode is not bet on.
pub fn size_wager(bank: f64, magnitude: f64, mode: &Mode, cfg: &BettingConfig) -> Option<f64> {
    let (scale, bailout) = match mode {
        Mode::Matchmaking => (cfg.matchmaking_scale, cfg.bailout),
        Mode::Tournament => (cfg.tournament_scale, cfg.tournament_bailout),
        Mode::Exhibition | Mode::Unknown(_) => return None,
    };

    let mut wager = bank * magnitude * scale;
    if bank - wager < bailout || wager > bank || bank < cfg.always_all_in {
        wager = bank;
    }
    Some(wager.min(cfg.max_bet))
}

/// What a single pass of the session did
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// Feed reported nothing new
    Idle,
    Skipped(String),
    Placed { slot: u8, amount: u64 },
    DryRun { slot: u8, amount: u64 },
    /// Failure breaker tripped
    Halted,
}

pub struct LiveSession {
    feed: Arc<dyn LiveFeed>,
    bank_source: Arc<dyn BankrollSource>,
    submitter: Arc<dyn WagerSubmitter>,
    history: Arc<dyn RecordSource>,
    updates: Arc<dyn RecordSource>,
    ensemble: Ensemble,
    predictors: BTreeMap<Tier, DenseNetwork>,
    layout: FeatureLayout,
    cfg: BettingConfig,
    dry_run: bool,
    /// Poll and bankroll failures
    feed_breaker: FailureBreaker,
    /// Stats rebuilds and update fetches
    store_breaker: FailureBreaker,
    /// Rejected or failed wagers
    wager_breaker: FailureBreaker,
    shutdown: ShutdownFlag,

    models: TierModels,
    since: DateTime<Utc>,
    pot_avg: f64,
    bankroll: Option<f64>,
    bank_dirty: bool,
    last_mode: Option<Mode>,
    pending: MatchMeta,
}

/// External collaborators of a live session
pub struct LiveSources {
    pub feed: Arc<dyn LiveFeed>,
    pub bank_source: Arc<dyn BankrollSource>,
    pub submitter: Arc<dyn WagerSubmitter>,
    /// Full history, used for the initial stats and after tournaments
    pub history: Arc<dyn RecordSource>,
    /// Contests settled since the session started
    pub updates: Arc<dyn RecordSource>,
}

impl LiveSession {
    pub fn new(
        sources: LiveSources,
        ensemble: Ensemble,
        predictors: BTreeMap<Tier, DenseNetwork>,
        layout: FeatureLayout,
        cfg: BettingConfig,
        dry_run: bool,
        shutdown: ShutdownFlag,
    ) -> Result<Self> {
        for predictor in predictors.values() {
            layout.check_predictor(predictor)?;
        }
        let threshold = cfg.max_consecutive_failures;
        Ok(Self {
            feed: sources.feed,
            bank_source: sources.bank_source,
            submitter: sources.submitter,
            history: sources.history,
            updates: sources.updates,
            ensemble,
            predictors,
            layout,
            cfg,
            dry_run,
            feed_breaker: FailureBreaker::with_threshold(threshold),
            store_breaker: FailureBreaker::with_threshold(threshold),
            wager_breaker: FailureBreaker::with_threshold(threshold),
            shutdown,
            models: TierModels::new(),
            since: DateTime::<Utc>::default(),
            pot_avg: 0.0,
            bankroll: None,
            bank_dirty: true,
            last_mode: None,
            pending: MatchMeta::default(),
        })
    }

    pub fn models(&self) -> &TierModels {
        &self.models
    }

    pub fn bankroll(&self) -> Option<f64> {
        self.bankroll
    }

    /// Rebuild every tier's stats from the full history
    pub async fn rebuild_stats(&mut self) -> Result<()> {
        let batch = self
            .history
            .fetch(DateTime::<Utc>::default(), false, 0.0)
            .await?;

        let mut models = TierModels::new();
        for (tier, records) in &batch.by_tier {
            let mut stats = StatsBook::new();
            stats.update(records);
            models.insert(
                *tier,
                TierModel {
                    stats,
                    predictor: self.predictors.get(tier).cloned(),
                },
            );
        }
        for (tier, predictor) in &self.predictors {
            models
                .entry(*tier)
                .or_insert_with(|| TierModel::new(StatsBook::new()))
                .predictor = Some(predictor.clone());
        }

        info!(
            "Stats rebuilt from {} contests across {} tiers",
            batch.len(),
            models.len()
        );
        self.models = models;
        if let Some(latest) = batch.latest {
            self.since = latest;
        }
        self.pot_avg = batch.pot_avg;
        Ok(())
    }

    /// Run until shutdown or until the failure breaker trips
    pub async fn run(&mut self) -> Result<()> {
        self.rebuild_stats().await?;
        info!(
            "Live session started (dry_run={}, ensemble={})",
            self.dry_run,
            self.ensemble.len()
        );

        while !self.shutdown.is_requested() {
            match self.step().await? {
                StepOutcome::Halted => {
                    error!("Too many consecutive failures, ending session");
                    break;
                }
                StepOutcome::Idle => {
                    self.pause(Duration::from_millis(self.cfg.poll_interval_ms)).await;
                }
                StepOutcome::Skipped(reason) => debug!("skipped: {}", reason),
                StepOutcome::Placed { .. } | StepOutcome::DryRun { .. } => {}
            }
        }
        info!("Live session stopped");
        Ok(())
    }

    async fn pause(&self, duration: Duration) {
        if duration.is_zero() {
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = self.shutdown.wait() => {}
        }
    }

    /// Count a feed failure; `true` once the breaker has tripped
    fn feed_failed(&self, reason: &str) -> bool {
        self.feed_breaker.record_failure(reason).is_err()
    }

    fn store_failed(&self, reason: &str) -> bool {
        self.store_breaker.record_failure(reason).is_err()
    }

    /// One pass over the feed
    pub async fn step(&mut self) -> Result<StepOutcome> {
        let meta = match self.feed.next_match(&self.pending).await {
            Ok(meta) => {
                self.feed_breaker.record_success();
                meta
            }
            Err(e) => {
                warn!("Failed to poll match status: {}", e);
                if self.feed_failed("poll") {
                    return Ok(StepOutcome::Halted);
                }
                return Ok(StepOutcome::Idle);
            }
        };
        if meta == self.pending || meta.is_empty() {
            self.pending = meta;
            return Ok(StepOutcome::Idle);
        }
        self.pending = meta.clone();

        let mode = meta.mode();
        if let Some(last) = &self.last_mode {
            if *last != mode {
                self.bank_dirty = true;
                if *last == Mode::Tournament {
                    info!("Tournament ended, rebuilding stats");
                    match self.rebuild_stats().await {
                        Ok(()) => self.store_breaker.record_success(),
                        Err(e) => {
                            // last_mode stays on the tournament so the next contest retries
                            warn!("Stats rebuild failed: {}", e);
                            if self.store_failed("rebuild") {
                                return Ok(StepOutcome::Halted);
                            }
                            return Ok(StepOutcome::Skipped("stats rebuild failed".to_string()));
                        }
                    }
                }
            }
        }
        self.last_mode = Some(mode.clone());

        if self.bank_dirty || self.bankroll.is_none() {
            match self.bank_source.bankroll().await {
                Ok(bank) => {
                    info!("Bankroll: {:.0}", bank);
                    self.bankroll = Some(bank);
                    self.bank_dirty = false;
                }
                Err(e) => {
                    warn!("Bankroll lookup failed: {}", e);
                    if self.feed_failed("bankroll") {
                        return Ok(StepOutcome::Halted);
                    }
                    return Ok(StepOutcome::Skipped("bankroll unavailable".to_string()));
                }
            }
        }
        let bank = self.bankroll.unwrap_or(0.0);

        if let Err(e) = self.ingest(mode == Mode::Tournament).await {
            warn!("Fetching new contests failed: {}", e);
            if self.store_failed("updates") {
                return Ok(StepOutcome::Halted);
            }
            return Ok(StepOutcome::Skipped("stats out of date".to_string()));
        }
        self.store_breaker.record_success();

        let tier: Tier = match meta.tier.parse() {
            Ok(tier) => tier,
            Err(_) => return Ok(StepOutcome::Skipped(format!("unknown tier {:?}", meta.tier))),
        };

        for name in [&meta.name_a, &meta.name_b] {
            let known = self
                .models
                .get(&tier)
                .is_some_and(|m| m.stats.contains(name));
            if !known {
                info!("No data for {:?}", name);
                return Ok(StepOutcome::Skipped(format!("no data for {}", name)));
            }
        }

        let rec = ContestRecord::live(tier, &meta.name_a, &meta.name_b, self.pot_avg);
        let vector = betting_vector(&self.models, self.layout, &rec, bank);
        let decision = self.ensemble.consensus(&vector);
        if decision.is_pass() {
            info!("Too close to call");
            return Ok(StepOutcome::Skipped("too close to call".to_string()));
        }

        let Some(wager) = size_wager(bank, decision.magnitude, &mode, &self.cfg) else {
            info!("Not betting on {} contests", mode);
            return Ok(StepOutcome::Skipped(format!("mode {}", mode)));
        };
        let amount = wager.max(0.0).round() as u64;
        let pick = rec.name(decision.side);
        let slot = if pick == meta.name_a {
            1
        } else if pick == meta.name_b {
            2
        } else {
            return Err(DuelbetError::Internal(format!(
                "picked {:?} is not in {:?} vs {:?}",
                pick, meta.name_a, meta.name_b
            )));
        };

        info!(
            "base={:.0} adj={} avgpot={:.0} tier={} mode={}",
            bank * decision.magnitude,
            amount,
            self.pot_avg,
            tier,
            mode
        );
        info!("Placing {} on {:?}", amount, pick);

        self.pause(Duration::from_millis(self.cfg.settle_delay_ms)).await;
        self.bank_dirty = true;

        if self.dry_run {
            info!("[DRY RUN] would place {} on player{}", amount, slot);
            return Ok(StepOutcome::DryRun { slot, amount });
        }

        match self.submitter.place(slot, amount).await {
            Ok(()) => {
                self.wager_breaker.record_success();
                Ok(StepOutcome::Placed { slot, amount })
            }
            Err(e) => {
                warn!("Error placing wager: {}", e);
                if self.wager_breaker.record_failure("wager").is_err() {
                    return Ok(StepOutcome::Halted);
                }
                Ok(StepOutcome::Skipped("wager rejected".to_string()))
            }
        }
    }

    /// Fold contests settled since the last fetch into the stats
    async fn ingest(&mut self, include_tournament: bool) -> Result<()> {
        let batch = self
            .updates
            .fetch(self.since, include_tournament, self.pot_avg)
            .await?;
        for (tier, records) in &batch.by_tier {
            self.models
                .entry(*tier)
                .or_insert_with(|| TierModel {
                    stats: StatsBook::new(),
                    predictor: self.predictors.get(tier).cloned(),
                })
                .stats
                .update(records);
            info!("Added {} contest(s) to tier {}", records.len(), tier);
        }
        if let Some(latest) = batch.latest {
            if latest > self.since {
                self.since = latest;
            }
        }
        if !batch.is_empty() {
            self.pot_avg = batch.pot_avg;
        }
        Ok(())
    }
}
