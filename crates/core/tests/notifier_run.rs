//! End-to-end runs of the notifier against an in-memory repository.
//!
//! Each test drives `NotifierRun` twice or more over the same state file,
//! mutating the fake repository in between, and checks what was sent and
//! what was recorded. Tokio time is paused so the pacing delay between
//! messages costs nothing.

mod common;

use std::time::Duration;

use tempfile::TempDir;

use common::{base_layer, config_with, sample_diff, test_config, FakeRepo, RecordingTransport};
use gitnotifier_core::config::NotifierConfig;
use gitnotifier_core::errors::{CoreError, StateError};
use gitnotifier_core::runner::{NotifierRun, RunOutcome, RunReport};
use gitnotifier_core::snapshot::{Snapshot, SnapshotStore};

// ===========================================================================
// Helpers
// ===========================================================================

const A: &str = "aaaaaaa111";
const B: &str = "bbbbbbb222";
const C: &str = "ccccccc333";
const T: &str = "ttttttt444";

struct Fixture {
    _dir: TempDir,
    config: NotifierConfig,
    repo: FakeRepo,
    transport: RecordingTransport,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir.path().join("state.dat"));
        let mut repo = FakeRepo::new();
        repo.commit(A, &[], "initial import");
        repo.set_head("main", A);
        Self {
            _dir: dir,
            config,
            repo,
            transport: RecordingTransport::new(),
        }
    }

    async fn run(&self) -> RunReport {
        self.run_with(&self.config).await
    }

    async fn run_with(&self, config: &NotifierConfig) -> RunReport {
        NotifierRun::new(config, &self.repo, &self.transport)
            .execute()
            .await
            .expect("run succeeds")
    }

    /// First run: records state, sends nothing.
    async fn prime(&self) {
        let report = self.run().await;
        assert_eq!(report.outcome, RunOutcome::Initial);
        assert_eq!(report.sent, 0);
        self.transport.clear();
    }

    fn saved(&self) -> Snapshot {
        SnapshotStore::new(&self.config.state_file)
            .load()
            .unwrap()
            .expect("state file exists")
    }

    fn layer(&self) -> gitnotifier_core::ConfigLayer {
        base_layer(&self.config.state_file)
    }
}

// ===========================================================================
// Regular runs
// ===========================================================================

#[tokio::test(start_paused = true)]
async fn test_first_run_records_state_only() {
    let fx = Fixture::new();
    let report = fx.run().await;

    assert_eq!(report.outcome, RunOutcome::Initial);
    assert!(report.saved);
    assert!(fx.transport.messages().is_empty());

    let saved = fx.saved();
    assert_eq!(saved.heads.get("main").map(String::as_str), Some(A));
    assert!(saved.revs.contains(A));
}

#[tokio::test(start_paused = true)]
async fn test_new_commit_on_main() {
    let mut fx = Fixture::new();
    fx.prime().await;

    fx.repo.commit(B, &[A], "second commit");
    fx.repo.set_head("main", B);
    let report = fx.run().await;

    assert_eq!(report.outcome, RunOutcome::Reported);
    assert_eq!(report.sent, 1);
    assert_eq!(fx.transport.subjects(), vec!["[git] main: second commit (bbbbbbb)"]);

    let message = &fx.transport.messages()[0];
    assert_eq!(message.from, "Git <git@example.com>");
    assert_eq!(message.recipients, vec!["dev@example.com"]);
    assert_eq!(message.repository, "ssh://git.example.com/project");
    assert!(message.html_body.contains("On branch  : main"));
    assert!(message.html_body.contains("<span class=\"gi\">+second commit</span>"));

    let saved = fx.saved();
    assert_eq!(saved.heads.get("main").map(String::as_str), Some(B));
    assert!(saved.revs.contains(B));
}

#[tokio::test(start_paused = true)]
async fn test_unchanged_repository_sends_nothing() {
    let fx = Fixture::new();
    fx.prime().await;

    let report = fx.run().await;
    assert_eq!(report.outcome, RunOutcome::Reported);
    assert_eq!(report.sent, 0);
}

#[tokio::test(start_paused = true)]
async fn test_oversized_diff_is_suppressed() {
    let mut fx = Fixture::new();
    fx.prime().await;

    let mut diff = sample_diff("big change");
    for i in 0..400 {
        diff.push_str(&format!("+generated line {}\n", i));
    }
    fx.repo.commit_with_diff(B, &[A], "big change", &diff);
    fx.repo.set_head("main", B);

    let config = config_with(gitnotifier_core::ConfigLayer {
        maxdiffsize: Some(1),
        ..fx.layer()
    });
    fx.run_with(&config).await;

    let messages = fx.transport.messages();
    assert_eq!(messages.len(), 1);
    let body = &messages[0].html_body;
    assert!(body.contains("Diff suppressed because of size. To see it, use:"));
    assert!(body.contains(&format!(
        "git diff-tree --patch-with-stat --no-color --find-copies-harder --ignore-space-at-eol {}",
        B
    )));
    assert!(!body.contains("<span class=\"gi\">"));
}

#[tokio::test(start_paused = true)]
async fn test_nodiff_keeps_metadata() {
    let mut fx = Fixture::new();
    fx.prime().await;

    fx.repo.commit(B, &[A], "vendor import [nodiff]");
    fx.repo.set_head("main", B);
    fx.run().await;

    let messages = fx.transport.messages();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].html_body.contains("vendor import [nodiff]"));
    assert!(!messages[0].html_body.contains("<span class=\"gi\">"));
}

#[tokio::test(start_paused = true)]
async fn test_nomail_commit_is_recorded_but_not_sent() {
    let mut fx = Fixture::new();
    fx.prime().await;

    fx.repo.commit(B, &[A], "tweak whitespace [nomail]");
    fx.repo.set_head("main", B);
    let report = fx.run().await;

    assert_eq!(report.sent, 0);
    assert!(fx.transport.messages().is_empty());
    assert!(fx.saved().revs.contains(B));
}

#[tokio::test(start_paused = true)]
async fn test_branch_deleted() {
    let mut fx = Fixture::new();
    fx.repo.commit(T, &[A], "topic work");
    fx.repo.set_head("topic", T);
    fx.prime().await;

    fx.repo.delete_head("topic");
    fx.run().await;

    assert_eq!(fx.transport.subjects(), vec!["[git] branch 'topic' deleted"]);
    assert!(!fx.saved().heads.contains_key("topic"));
}

#[tokio::test(start_paused = true)]
async fn test_deleted_branch_revisions_stay_recorded() {
    let mut fx = Fixture::new();
    fx.repo.commit(T, &[A], "topic work");
    fx.repo.set_head("topic", T);
    fx.prime().await;

    fx.repo.delete_head("topic");
    fx.run().await;
    assert!(fx.saved().revs.contains(T));

    // Pushing the same branch again is not news.
    fx.repo.set_head("topic", T);
    fx.transport.clear();
    fx.run().await;

    assert_eq!(fx.transport.subjects(), vec!["[git] branch 'topic' created"]);
    let saved = fx.saved();
    assert!(saved.revs.contains(A));
    assert!(saved.revs.contains(T));
}

#[tokio::test(start_paused = true)]
async fn test_updateonly_keeps_unreachable_revisions() {
    let mut fx = Fixture::new();
    fx.repo.commit(T, &[A], "topic work");
    fx.repo.set_head("topic", T);
    fx.prime().await;

    fx.repo.delete_head("topic");
    let config = config_with(gitnotifier_core::ConfigLayer {
        updateonly: Some(true),
        ..fx.layer()
    });
    let report = fx.run_with(&config).await;

    assert_eq!(report.outcome, RunOutcome::UpdateOnly);
    assert!(fx.saved().revs.contains(T));
}

#[tokio::test(start_paused = true)]
async fn test_non_utf8_diff_is_rendered() {
    let mut fx = Fixture::new();
    fx.prime().await;

    let diff: &[u8] = b"@@ -1 +1 @@\n-caf\xe9\n+cafe\n\\ No newline at end of file\n";
    fx.repo.commit_with_raw_diff(B, &[A], "fix spelling", diff);
    fx.repo.set_head("main", B);
    let report = fx.run().await;

    assert_eq!(report.outcome, RunOutcome::Reported);
    assert_eq!(fx.transport.subjects(), vec!["[git] main: fix spelling (bbbbbbb)"]);
    let body = &fx.transport.messages()[0].html_body;
    assert!(body.contains("<span class=\"gd\">-caf\u{fffd}</span>"));
    assert!(body.contains("<span class=\"gi\">+cafe</span>"));
    assert!(fx.saved().revs.contains(B));
}

#[tokio::test(start_paused = true)]
async fn test_branch_created_with_new_commit() {
    let mut fx = Fixture::new();
    fx.prime().await;

    fx.repo.commit(T, &[A], "start topic");
    fx.repo.set_head("topic", T);
    fx.run().await;

    assert_eq!(
        fx.transport.subjects(),
        vec![
            "[git] branch 'topic' created",
            "[git] topic: start topic (ttttttt)",
        ]
    );
    let created = &fx.transport.messages()[0].html_body;
    assert!(created.contains("New branch : topic"));
    assert!(created.contains(&format!("Referencing: {}", T)));
}

#[tokio::test(start_paused = true)]
async fn test_annotated_tag_created_lightweight_ignored() {
    let mut fx = Fixture::new();
    fx.prime().await;

    fx.repo.annotated_tag("v1.0", "7a90b1ec7", A);
    fx.repo.lightweight_tag("wip", A);
    fx.run().await;

    assert_eq!(fx.transport.subjects(), vec!["[git] tag 'v1.0' created"]);
    let saved = fx.saved();
    assert!(saved.tags.contains_key("v1.0"));
    assert!(!saved.tags.contains_key("wip"));
}

#[tokio::test(start_paused = true)]
async fn test_fast_forward_sends_head_moved_summary() {
    let mut fx = Fixture::new();
    fx.repo.commit(T, &[A], "topic work");
    fx.repo.set_head("topic", T);
    fx.prime().await;

    fx.repo.set_head("main", T);
    fx.run().await;

    assert_eq!(
        fx.transport.subjects(),
        vec!["[git] main's head updated: topic work (ttttttt)"]
    );
    let body = &fx.transport.messages()[0].html_body;
    assert!(body.contains("Branch 'main' now includes:"));
    assert!(body.contains("     ttttttt topic work"));
}

#[tokio::test(start_paused = true)]
async fn test_allchanges_reports_each_revision() {
    let mut fx = Fixture::new();
    fx.repo.commit(T, &[A], "topic work");
    fx.repo.set_head("topic", T);
    fx.prime().await;

    fx.repo.set_head("main", T);
    let config = config_with(gitnotifier_core::ConfigLayer {
        allchanges: Some(vec!["main".into()]),
        ..fx.layer()
    });
    fx.run_with(&config).await;

    assert_eq!(fx.transport.subjects(), vec!["[git] main: topic work (ttttttt)"]);
}

#[tokio::test(start_paused = true)]
async fn test_allchanges_does_not_repeat_within_run() {
    let mut fx = Fixture::new();
    fx.prime().await;

    fx.repo.commit(B, &[A], "second commit");
    fx.repo.set_head("main", B);
    let config = config_with(gitnotifier_core::ConfigLayer {
        allchanges: Some(vec!["main".into()]),
        ..fx.layer()
    });
    let report = fx.run_with(&config).await;

    assert_eq!(report.sent, 1);
    assert_eq!(fx.transport.subjects(), vec!["[git] main: second commit (bbbbbbb)"]);
}

#[tokio::test(start_paused = true)]
async fn test_new_revisions_sent_oldest_first() {
    let mut fx = Fixture::new();
    fx.prime().await;

    fx.repo.commit(B, &[A], "second");
    fx.repo.commit(C, &[B], "third");
    fx.repo.set_head("main", C);
    fx.run().await;

    assert_eq!(
        fx.transport.subjects(),
        vec!["[git] main: second (bbbbbbb)", "[git] main: third (ccccccc)"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_messages_are_paced() {
    let mut fx = Fixture::new();
    fx.prime().await;

    fx.repo.commit(B, &[A], "second");
    fx.repo.commit(C, &[B], "third");
    fx.repo.set_head("main", C);

    let start = tokio::time::Instant::now();
    fx.run().await;
    assert!(start.elapsed() >= Duration::from_secs(4));
}

#[tokio::test(start_paused = true)]
async fn test_noupdate_leaves_state_alone() {
    let mut fx = Fixture::new();
    fx.prime().await;

    fx.repo.commit(B, &[A], "second");
    fx.repo.set_head("main", B);
    let config = config_with(gitnotifier_core::ConfigLayer {
        noupdate: Some(true),
        ..fx.layer()
    });
    let report = fx.run_with(&config).await;

    assert_eq!(report.sent, 1);
    assert!(!report.saved);
    assert_eq!(fx.saved().heads.get("main").map(String::as_str), Some(A));
}

#[tokio::test(start_paused = true)]
async fn test_updateonly_records_without_sending() {
    let mut fx = Fixture::new();
    fx.prime().await;

    fx.repo.commit(B, &[A], "second");
    fx.repo.set_head("main", B);
    let config = config_with(gitnotifier_core::ConfigLayer {
        updateonly: Some(true),
        ..fx.layer()
    });
    let report = fx.run_with(&config).await;

    assert_eq!(report.outcome, RunOutcome::UpdateOnly);
    assert!(fx.transport.messages().is_empty());
    assert_eq!(fx.saved().heads.get("main").map(String::as_str), Some(B));
}

// ===========================================================================
// Manual modes
// ===========================================================================

#[tokio::test(start_paused = true)]
async fn test_manual_report_leaves_state_alone() {
    let mut fx = Fixture::new();
    fx.repo.commit(B, &[A], "second");
    fx.repo.set_head("main", B);
    fx.prime().await;
    let before = std::fs::read_to_string(&fx.config.state_file).unwrap();

    let config = config_with(gitnotifier_core::ConfigLayer {
        manual: Some(B.into()),
        ..fx.layer()
    });
    let report = fx.run_with(&config).await;

    assert_eq!(report.outcome, RunOutcome::ManualReport);
    assert_eq!(fx.transport.subjects(), vec!["[git] main: second (bbbbbbb)"]);
    assert_eq!(std::fs::read_to_string(&fx.config.state_file).unwrap(), before);
}

#[tokio::test(start_paused = true)]
async fn test_manual_diff_sent_once() {
    let mut fx = Fixture::new();
    fx.repo.commit(B, &[A], "second");
    fx.repo.commit(C, &[B], "third");
    fx.repo.set_head("main", C);
    fx.prime().await;

    let config = config_with(gitnotifier_core::ConfigLayer {
        diff: Some(format!("{}..{}", B, C)),
        ..fx.layer()
    });
    let report = fx.run_with(&config).await;

    assert_eq!(report.outcome, RunOutcome::ManualDiff);
    // B..C starts at B itself: one diff, B against C.
    assert_eq!(
        fx.transport.subjects(),
        vec!["[git] <manual-diff> diff: third (ccccccc)"]
    );
    let saved = fx.saved();
    assert!(saved.diffs.contains(&format!("<manual-diff>-{}", C)));
    assert_eq!(saved.heads.get("main").map(String::as_str), Some(C));

    fx.transport.clear();
    let again = fx.run_with(&config).await;
    assert_eq!(again.sent, 0);

    // A regular run keeps the recorded diffs.
    fx.run().await;
    assert!(fx.saved().diffs.contains(&format!("<manual-diff>-{}", C)));
}

// ===========================================================================
// Failures
// ===========================================================================

#[tokio::test(start_paused = true)]
async fn test_corrupt_state_file_is_fatal() {
    let fx = Fixture::new();
    std::fs::write(&fx.config.state_file, "bogus main abc\n").unwrap();

    let result = NotifierRun::new(&fx.config, &fx.repo, &fx.transport)
        .execute()
        .await;
    assert!(matches!(
        result,
        Err(CoreError::State(StateError::UnknownRecordType(ref t))) if t == "bogus"
    ));
    assert!(fx.transport.messages().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_vcs_failure_does_not_persist() {
    let mut fx = Fixture::new();
    fx.prime().await;
    let before = std::fs::read_to_string(&fx.config.state_file).unwrap();

    fx.repo.set_head("broken", "0000000dead");
    let result = NotifierRun::new(&fx.config, &fx.repo, &fx.transport)
        .execute()
        .await;

    assert!(matches!(result, Err(CoreError::Vcs(_))));
    assert_eq!(std::fs::read_to_string(&fx.config.state_file).unwrap(), before);
}
