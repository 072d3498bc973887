use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use preview_merger::config::{Config, MergeConfig, PathsConfig, ReportsConfig};
use preview_merger::error::MergeError;
use preview_merger::extract::XmlPreviewExtractor;
use preview_merger::ledger::Ledger;
use preview_merger::models::{Action, Policy};
use preview_merger::preflight::RunLock;
use preview_merger::reconcile::{run_reconcile, RunOptions};
use preview_merger::report::RunReport;
use tempfile::TempDir;

const GUID: &str = "7f3c2a10-aaaa-bbbb-cccc-000000000001";

struct Env {
    _tmp: TempDir,
    root: PathBuf,
    config: Config,
}

impl Env {
    fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().to_path_buf();
        let config = Config {
            paths: PathsConfig {
                input_root: root.join("input"),
                staging_root: root.join("staging"),
                archive_root: Some(root.join("archive")),
                ledger: root.join("ledger/history.db"),
            },
            merge: MergeConfig::default(),
            reports: ReportsConfig {
                json: Some(root.join("reports/summary.json")),
                probe: Vec::new(),
            },
        };
        fs::create_dir_all(&config.paths.input_root).unwrap();
        fs::create_dir_all(&config.paths.staging_root).unwrap();
        Self {
            _tmp: tmp,
            root,
            config,
        }
    }

    fn contribute(&self, owner: &str, file: &str, body: &str) -> PathBuf {
        let dir = self.config.paths.input_root.join(owner);
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(file);
        fs::write(&path, body).unwrap();
        path
    }

    fn staging(&self) -> &Path {
        &self.config.paths.staging_root
    }

    fn archive_bucket(&self) -> PathBuf {
        self.root
            .join("archive")
            .join(chrono::Local::now().format("%Y-%m-%d").to_string())
    }

    async fn run(&self, apply: bool) -> RunReport {
        let options = RunOptions {
            apply,
            ..Default::default()
        };
        run_reconcile(&self.config, &options, &XmlPreviewExtractor)
            .await
            .unwrap()
    }
}

fn preview(id: &str, name: &str, rev: &str, comments: &[&str]) -> String {
    let mut body = format!(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<PreviewClass id=\"{}\" Name=\"{}\" Revision=\"{}\">\n",
        id, name, rev
    );
    for c in comments {
        body.push_str(&format!("  <PropClass Comment=\"{}\" />\n", c));
    }
    body.push_str("</PreviewClass>\n");
    body
}

fn set_mtime(path: &Path, secs: u64) {
    fs::File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(secs))
        .unwrap();
}

/// Relative path → bytes for every file under `dir`.
fn snapshot(dir: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    let mut out = BTreeMap::new();
    if !dir.exists() {
        return out;
    }
    for entry in walkdir::WalkDir::new(dir) {
        let entry = entry.unwrap();
        if entry.file_type().is_file() {
            out.insert(
                entry.path().strip_prefix(dir).unwrap().to_path_buf(),
                fs::read(entry.path()).unwrap(),
            );
        }
    }
    out
}

#[tokio::test]
async fn higher_revision_is_staged_then_idempotent() {
    let env = Env::new();
    env.contribute("alice", "show.lorprev", &preview(GUID, "Show", "3.0", &["A1", "A2"]));
    let bob = env.contribute("bob", "show.lorprev", &preview(GUID, "Show", "5.0", &["B1", "B2"]));

    let first = env.run(true).await;
    assert_eq!(first.groups.len(), 1);
    let g = &first.groups[0];
    assert_eq!(g.action, Action::StageNew);
    assert_eq!(g.winner, bob);
    assert!(g.reason.contains("highest revision"));
    assert!(!g.conflict);
    assert_eq!(g.change, "new");
    assert_eq!(first.exit_code(), 0);

    let staged = env.staging().join("Show__7f3c2a10.lorprev");
    assert_eq!(fs::read(&staged).unwrap(), fs::read(&bob).unwrap());

    let staging_before = snapshot(env.staging());
    let archive_before = snapshot(&env.root.join("archive"));

    let second = env.run(true).await;
    assert!(second.groups.iter().all(|g| g.action == Action::Noop));
    assert_eq!(second.groups[0].change, "none");
    assert_eq!(second.sweep.as_ref().unwrap().moved, 0);
    assert_eq!(snapshot(env.staging()), staging_before);
    assert_eq!(snapshot(&env.root.join("archive")), archive_before);

    let ledger = Ledger::open_read_only(&env.config.paths.ledger)
        .await
        .unwrap()
        .unwrap();
    let runs = ledger.recent_runs(10).await.unwrap();
    assert_eq!(runs.len(), 2);
    assert!(runs.iter().all(|r| r.observations == 2 && r.decisions == 1));
    let state = ledger.prior_state(&format!("ID:{}", GUID)).await.unwrap().unwrap();
    assert_eq!(state.revision_num, Some(5.0));
    ledger.close().await;
}

#[tokio::test]
async fn update_backs_up_previous_content() {
    let env = Env::new();
    let path = env.contribute("alice", "show.lorprev", &preview(GUID, "Show", "1", &["A1"]));
    env.run(true).await;
    let staged = env.staging().join("Show__7f3c2a10.lorprev");
    let old = fs::read(&staged).unwrap();

    fs::write(&path, preview(GUID, "Show", "2", &["A1", "A2"])).unwrap();
    let report = env.run(true).await;
    let g = &report.groups[0];
    assert_eq!(g.action, Action::Update);
    assert_eq!(g.change, "rev+content");
    assert_eq!(fs::read(&staged).unwrap(), fs::read(&path).unwrap());

    // The backup is written next to the staged file, then swept into the
    // dated archive because it is not a current winner.
    let backup = g.backup.clone().unwrap();
    let archived = env.archive_bucket().join(backup.file_name().unwrap());
    assert_eq!(fs::read(archived).unwrap(), old);
}

#[tokio::test]
async fn sweep_archives_everything_not_kept() {
    let env = Env::new();
    env.contribute("alice", "show.lorprev", &preview(GUID, "Show", "1", &["A1"]));
    fs::write(env.staging().join("retired.lorprev"), preview("other", "Old", "1", &["X"])).unwrap();
    fs::write(env.staging().join("notes.txt"), "hand-written notes").unwrap();
    let before = snapshot(env.staging());

    let report = env.run(true).await;
    let sweep = report.sweep.unwrap();
    assert_eq!(sweep.moved, 2);
    assert_eq!(sweep.kept, 1);

    let bucket = snapshot(&env.archive_bucket());
    for (name, bytes) in before {
        let kept = env.staging().join(&name);
        if kept.exists() {
            assert_eq!(name, PathBuf::from("Show__7f3c2a10.lorprev"));
        } else {
            assert_eq!(bucket.get(&name), Some(&bytes));
        }
    }
}

#[tokio::test]
async fn dry_run_changes_nothing() {
    let env = Env::new();
    env.contribute("alice", "show.lorprev", &preview(GUID, "Show", "1", &["A1"]));
    fs::write(env.staging().join("retired.lorprev"), "old").unwrap();
    let input_before = snapshot(&env.config.paths.input_root);
    let staging_before = snapshot(env.staging());

    let report = env.run(false).await;
    assert_eq!(report.mode, "dry-run");
    assert!(report.run_id.is_none());
    assert!(report.sweep.is_none());
    assert_eq!(report.groups[0].action, Action::StageNew);

    assert_eq!(snapshot(&env.config.paths.input_root), input_before);
    assert_eq!(snapshot(env.staging()), staging_before);
    assert!(!env.config.paths.ledger.exists());
    assert!(!env.root.join("archive").exists());
    // The summary is still written.
    assert!(env.root.join("reports/summary.json").exists());
}

#[tokio::test]
async fn ineligible_copy_never_overwrites_staged() {
    let env = Env::new();
    env.contribute("alice", "show.lorprev", &preview(GUID, "Show", "1", &["A1", "A2"]));
    env.run(true).await;
    let staged = env.staging().join("Show__7f3c2a10.lorprev");
    let good = fs::read(&staged).unwrap();

    // Only copy left is a higher revision whose names all contain spaces.
    fs::remove_file(env.config.paths.input_root.join("alice/show.lorprev")).unwrap();
    env.contribute("bob", "show.lorprev", &preview(GUID, "Show", "9", &["A 1", "A 2"]));

    let report = env.run(true).await;
    let g = &report.groups[0];
    assert_eq!(g.action, Action::Blocked);
    assert!(g.conflict);
    assert_eq!(report.exit_code(), 2);
    assert_eq!(fs::read(&staged).unwrap(), good);

    let ledger = Ledger::open_read_only(&env.config.paths.ledger)
        .await
        .unwrap()
        .unwrap();
    let state = ledger.prior_state(&format!("ID:{}", GUID)).await.unwrap().unwrap();
    assert_eq!(state.revision_num, Some(1.0));
    ledger.close().await;
}

#[tokio::test]
async fn eligible_lower_revision_beats_ineligible() {
    let env = Env::new();
    env.contribute("alice", "show.lorprev", &preview(GUID, "Show", "9.0", &["A 1", "A 2", " "]));
    let bob = env.contribute("bob", "show.lorprev", &preview(GUID, "Show", "1.0", &["B1", "B2", "B3"]));

    let report = env.run(false).await;
    let g = &report.groups[0];
    assert_eq!(g.winner, bob);
    assert_eq!(g.action, Action::StageNew);
    assert!(!g.conflict);
}

#[tokio::test]
async fn content_tie_is_a_conflict() {
    let env = Env::new();
    let a = env.contribute("alice", "show.lorprev", &preview(GUID, "Show", "2", &["A1"]));
    let b = env.contribute("bob", "show.lorprev", &preview(GUID, "Show", "2", &["B1"]));
    set_mtime(&a, 1_700_000_000);
    set_mtime(&b, 1_700_000_000);

    let report = env.run(true).await;
    let g = &report.groups[0];
    assert!(g.conflict);
    assert_eq!(g.winner, a);
    assert!(g.reason.contains("needs review"));
    assert_eq!(report.exit_code(), 2);
    // Conflicts are still promoted; review happens afterwards.
    assert_eq!(g.action, Action::StageNew);
}

#[tokio::test]
async fn identical_copies_pick_latest_without_conflict() {
    let env = Env::new();
    let body = preview(GUID, "Show", "2", &["A1"]);
    let a = env.contribute("alice", "show.lorprev", &body);
    let b = env.contribute("bob", "show.lorprev", &body);
    set_mtime(&a, 1_700_000_500);
    set_mtime(&b, 1_700_000_000);

    let report = env.run(false).await;
    assert_eq!(report.groups[0].winner, a);
    assert!(!report.groups[0].conflict);
}

#[tokio::test]
async fn policy_override_prefers_latest() {
    let env = Env::new();
    let older = env.contribute("alice", "show.lorprev", &preview(GUID, "Show", "9", &["A1", "A2"]));
    let newer = env.contribute("bob", "show.lorprev", &preview(GUID, "Show", "1", &["B1"]));
    set_mtime(&older, 1_700_000_000);
    set_mtime(&newer, 1_700_000_900);

    let options = RunOptions {
        policy: Some(Policy::PreferLatest),
        ..Default::default()
    };
    let report = run_reconcile(&env.config, &options, &XmlPreviewExtractor)
        .await
        .unwrap();
    assert_eq!(report.policy, Policy::PreferLatest);
    assert_eq!(report.groups[0].winner, newer);
}

#[tokio::test]
async fn forced_winner_bypasses_cascade() {
    let env = Env::new();
    let weaker = env.contribute("alice", "show.lorprev", &preview(GUID, "Show", "1", &["A1"]));
    env.contribute("bob", "show.lorprev", &preview(GUID, "Show", "5", &["B1", "B2"]));

    let options = RunOptions {
        force_winners: vec![format!("ID:{}={}", GUID, weaker.display())],
        ..Default::default()
    };
    let report = run_reconcile(&env.config, &options, &XmlPreviewExtractor)
        .await
        .unwrap();
    assert_eq!(report.groups[0].winner, weaker);
    assert!(report.groups[0].reason.starts_with("forced winner"));
}

#[tokio::test]
async fn staged_file_with_other_identity_is_not_overwritten() {
    let env = Env::new();
    env.contribute("alice", "show.lorprev", &preview(GUID, "Show", "1", &["A1"]));
    // A different artifact whose canonical name collides with the winner's.
    let squatter = env.staging().join("Show__7f3c2a10.lorprev");
    fs::write(&squatter, preview("7f3c2a10-ffff", "Show", "1", &["Z1"])).unwrap();

    let report = env.run(false).await;
    let g = &report.groups[0];
    assert_eq!(g.action, Action::Skip);
    assert!(g.reason.contains("identity mismatch"));
}

#[tokio::test]
async fn held_run_lock_aborts_before_mutation() {
    let env = Env::new();
    env.contribute("alice", "show.lorprev", &preview(GUID, "Show", "1", &["A1"]));
    let _held = RunLock::acquire(&env.config.paths.lock_path()).unwrap();

    let err = run_reconcile(
        &env.config,
        &RunOptions {
            apply: true,
            ..Default::default()
        },
        &XmlPreviewExtractor,
    )
    .await
    .unwrap_err();
    let merge = err.downcast_ref::<MergeError>().unwrap();
    assert!(merge.is_preflight());
    assert!(snapshot(env.staging()).is_empty());
    assert!(!env.config.paths.ledger.exists());
}

#[tokio::test]
async fn unparsable_inputs_are_dropped_not_fatal() {
    let env = Env::new();
    env.contribute("alice", "show.lorprev", &preview(GUID, "Show", "1", &["A1"]));
    let broken = env.contribute("bob", "broken.lorprev", "<PreviewClass Name=\"x\"><oops>");
    env.contribute("bob", "ignored.txt", "not matched by the include globs");

    let report = env.run(false).await;
    assert_eq!(report.candidates, 1);
    assert_eq!(report.dropped, vec![broken]);
    assert_eq!(report.groups.len(), 1);
}

#[tokio::test]
async fn contributor_folders_are_created_in_apply_mode() {
    let mut env = Env::new();
    env.config.merge.ensure_contributors = vec!["carol".to_string()];

    env.run(false).await;
    assert!(!env.config.paths.input_root.join("carol").exists());
    env.run(true).await;
    assert!(env.config.paths.input_root.join("carol").is_dir());
}

fn named_preview(name: &str, rev: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<PreviewClass Name=\"{}\" Revision=\"{}\">\n  <PropClass Comment=\"A1\" />\n</PreviewClass>\n",
        name, rev
    )
}

#[tokio::test]
async fn colliding_file_names_never_overwrite_another_identity() {
    let env = Env::new();
    let first = env.contribute("alice", "slash.lorprev", &named_preview("Arch/1", "1"));
    env.contribute("bob", "under.lorprev", &named_preview("Arch_1", "2"));
    let shared = env.staging().join("Arch_1.lorprev");

    // Dry-run: nothing is on disk yet, the second key still cannot claim it.
    let report = env.run(false).await;
    assert_eq!(report.groups[0].key, "NAME:arch/1");
    assert_eq!(report.groups[0].action, Action::StageNew);
    assert_eq!(report.groups[1].action, Action::Skip);
    assert!(report.groups[1].reason.contains("already claimed by NAME:arch/1"));

    let report = env.run(true).await;
    assert_eq!(report.groups[0].action, Action::StageNew);
    assert_eq!(report.groups[1].action, Action::Skip);
    assert!(report.groups[1].backup.is_none());
    assert_eq!(fs::read(&shared).unwrap(), fs::read(&first).unwrap());
    assert_eq!(report.sweep.as_ref().unwrap().moved, 0);

    let report = env.run(true).await;
    assert_eq!(report.groups[0].action, Action::Noop);
    assert_eq!(report.groups[1].action, Action::Skip);
    assert!(report.groups[1].reason.contains("identity mismatch"));
    assert_eq!(fs::read(&shared).unwrap(), fs::read(&first).unwrap());
    assert_eq!(
        snapshot(env.staging()).into_keys().collect::<Vec<_>>(),
        vec![PathBuf::from("Arch_1.lorprev")]
    );
}

#[tokio::test]
async fn failed_promotion_is_scoped_to_its_key() {
    const OTHER: &str = "9a8b7c6d-aaaa-bbbb-cccc-000000000002";
    let env = Env::new();
    env.contribute("alice", "show.lorprev", &preview(GUID, "Show", "1", &["A1"]));
    let porch = env.contribute("alice", "porch.lorprev", &preview(OTHER, "Porch", "1", &["P1"]));
    // A directory where the first winner should land makes its rename fail.
    fs::create_dir_all(env.staging().join("Show__7f3c2a10.lorprev")).unwrap();

    let report = env.run(true).await;
    let show_key = format!("ID:{}", GUID);
    let porch_key = format!("ID:{}", OTHER);
    let show = report.groups.iter().find(|g| g.key == show_key).unwrap();
    let other = report.groups.iter().find(|g| g.key == porch_key).unwrap();

    assert_eq!(show.action, Action::StageNew);
    assert!(show.reason.contains("; promotion failed"));
    assert!(show.error.is_some());
    assert!(env.staging().join("Show__7f3c2a10.lorprev").is_dir());
    assert!(!env.staging().join(".Show__7f3c2a10.lorprev.pmerge-tmp").exists());

    assert!(other.error.is_none());
    assert_eq!(
        fs::read(env.staging().join("Porch__9a8b7c6d.lorprev")).unwrap(),
        fs::read(&porch).unwrap()
    );
    assert_eq!(report.failures(), 1);

    let ledger = Ledger::open_read_only(&env.config.paths.ledger)
        .await
        .unwrap()
        .unwrap();
    let run_id = report.run_id.clone().unwrap();
    let mut decided = ledger.decisions_for_run(&run_id).await.unwrap();
    decided.sort();
    assert_eq!(
        decided,
        vec![
            (show_key.clone(), "stage-new".to_string()),
            (porch_key.clone(), "stage-new".to_string()),
        ]
    );
    assert!(ledger.prior_state(&show_key).await.unwrap().is_none());
    assert!(ledger.prior_state(&porch_key).await.unwrap().is_some());
    ledger.close().await;
}

#[tokio::test]
async fn unmovable_staged_file_is_left_in_place() {
    let env = Env::new();
    env.contribute("alice", "show.lorprev", &preview(GUID, "Show", "1", &["A1"]));
    let retired = env.staging().join("retired.lorprev");
    fs::write(&retired, "old").unwrap();
    fs::create_dir_all(env.archive_bucket().join("retired.lorprev")).unwrap();

    let report = env.run(true).await;
    let sweep = report.sweep.unwrap();
    assert_eq!(sweep.moved, 0);
    assert_eq!(sweep.kept, 2);
    assert_eq!(sweep.failed, vec![retired.clone()]);
    assert_eq!(fs::read_to_string(&retired).unwrap(), "old");
    assert_eq!(report.groups[0].action, Action::StageNew);
    assert!(env.staging().join("Show__7f3c2a10.lorprev").exists());
}
