//! One notifier run: load the previous snapshot, capture the current one,
//! report or run a manual mode, then persist.

use tracing::{info, warn};

use crate::config::NotifierConfig;
use crate::errors::CoreError;
use crate::notify::Transport;
use crate::reconcile::ReconciliationEngine;
use crate::snapshot::{Snapshot, SnapshotStore};
use crate::vcs::Vcs;

/// How a run went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// No previous snapshot: state recorded, nothing reported.
    Initial,
    /// `updateonly` set: state recorded, nothing reported.
    UpdateOnly,
    /// Changes since the previous snapshot were reported.
    Reported,
    ManualReport,
    ManualDiff,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunReport {
    pub outcome: RunOutcome,
    /// Messages handed to the transport.
    pub sent: usize,
    /// Whether the state file was written.
    pub saved: bool,
}

/// Orchestrates a single run against one repository.
pub struct NotifierRun<'a> {
    config: &'a NotifierConfig,
    vcs: &'a dyn Vcs,
    transport: &'a dyn Transport,
    store: SnapshotStore,
}

impl<'a> NotifierRun<'a> {
    pub fn new(config: &'a NotifierConfig, vcs: &'a dyn Vcs, transport: &'a dyn Transport) -> Self {
        Self {
            config,
            vcs,
            transport,
            store: SnapshotStore::new(&config.state_file),
        }
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    /// Run to completion. Any error aborts before the state file is touched.
    pub async fn execute(&self) -> Result<RunReport, CoreError> {
        let previous = self.store.load()?;
        let mut current = Snapshot::capture(self.vcs).await?;
        let mut engine = ReconciliationEngine::new(self.config, self.vcs, self.transport);

        if let Some(ref spec) = self.config.manual_diff {
            let mut diffs = previous
                .as_ref()
                .map(|p| p.diffs.clone())
                .unwrap_or_default();
            let sent = engine.manual_diff(spec, &mut diffs).await?;

            // Only the pseudo-revisions change; heads and revisions stay as
            // they were before the manual run.
            let saved = match previous {
                Some(mut previous) if !self.config.noupdate && sent > 0 => {
                    previous.diffs = diffs;
                    self.store.save(&previous)?;
                    true
                }
                _ => false,
            };
            return Ok(RunReport {
                outcome: RunOutcome::ManualDiff,
                sent: engine.sent(),
                saved,
            });
        }

        if let Some(ref spec) = self.config.manual_report {
            engine.manual_report(spec, &mut current).await?;
            return Ok(RunReport {
                outcome: RunOutcome::ManualReport,
                sent: engine.sent(),
                saved: false,
            });
        }

        let outcome = match previous {
            None => {
                info!("Initial run. Not generating any mails, just recording current state.");
                RunOutcome::Initial
            }
            Some(ref previous) if self.config.updateonly => {
                info!("Update-only run. Recording current state without reporting.");
                current.carry_forward(previous);
                RunOutcome::UpdateOnly
            }
            Some(ref previous) => {
                engine.run(previous, &mut current).await?;
                current.carry_forward(previous);
                RunOutcome::Reported
            }
        };

        let saved = if self.config.noupdate {
            warn!("noupdate set, not recording state");
            false
        } else {
            self.store.save(&current)?;
            true
        };

        info!(sent = engine.sent(), "run complete");
        Ok(RunReport {
            outcome,
            sent: engine.sent(),
            saved,
        })
    }
}
