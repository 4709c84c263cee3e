//! Integration tests for chunked link refresh jobs.

mod common;

use std::time::Duration;

use common::{MockRemote, context, context_with, folder, ids};
use pikarr::clients::RemoteError;
use pikarr::config::Config;
use pikarr::domain::EpisodeId;
use pikarr::library::{
    ActionClass, ActionKey, BatchStatus, LibraryError, PreconditionFailure, RefreshResult,
    ViewAction, ViewState,
};

fn assert_spaced(remote: &MockRemote) {
    let times = remote.refresh_times();
    for pair in times.windows(2) {
        assert!(
            pair[1] - pair[0] >= Duration::from_secs(8),
            "chunks only {:?} apart",
            pair[1] - pair[0]
        );
    }
}

#[tokio::test(start_paused = true)]
async fn test_seven_episodes_refresh_in_three_spaced_calls() {
    let remote = MockRemote::with_videos(7);
    let session = context(remote.clone()).open(folder());
    session.load(false).await.unwrap();

    let targets = session.request_batch_refresh(None).unwrap();
    assert_eq!(targets.len(), 7);
    let outcome = session.confirm_batch_refresh().await.unwrap();

    let sizes: Vec<usize> = remote.refresh_chunks().iter().map(Vec::len).collect();
    assert_eq!(sizes, vec![3, 3, 1]);
    assert_spaced(&remote);

    assert_eq!(outcome.status, BatchStatus::Completed);
    assert_eq!(outcome.success_count + outcome.failure_count, 7);
    assert!(session.records().iter().all(|r| r.play_url().is_some()));
}

#[tokio::test(start_paused = true)]
async fn test_call_count_is_ceiling_of_targets_over_chunk_size() {
    for n in [1_usize, 3, 4, 6, 10] {
        let remote = MockRemote::with_videos(n);
        let session = context(remote.clone()).open(folder());
        session.load(false).await.unwrap();

        session.request_batch_refresh(None).unwrap();
        session.confirm_batch_refresh().await.unwrap();

        assert_eq!(remote.refresh_chunks().len(), n.div_ceil(3), "n = {n}");
        assert_spaced(&remote);
    }
}

#[tokio::test(start_paused = true)]
async fn test_no_delay_before_first_or_after_last_chunk() {
    let remote = MockRemote::with_videos(6);
    let session = context(remote.clone()).open(folder());
    session.load(false).await.unwrap();

    session.request_batch_refresh(None).unwrap();
    let started = tokio::time::Instant::now();
    session.confirm_batch_refresh().await.unwrap();
    let elapsed = started.elapsed();

    let times = remote.refresh_times();
    assert_eq!(times[0], started);
    assert_eq!(elapsed, Duration::from_secs(8));
}

#[tokio::test(start_paused = true)]
async fn test_partial_chunk_failure_keeps_failed_record_unchanged() {
    let remote = MockRemote::with_videos(3);
    let session = context(remote.clone()).open(folder());
    session.load(false).await.unwrap();
    let before = session.records();

    remote.fail_links(&["ep3"]);
    session.request_batch_refresh(None).unwrap();
    let outcome = session.confirm_batch_refresh().await.unwrap();

    assert_eq!(outcome.success_count, 2);
    assert_eq!(outcome.failure_count, 1);

    let after = session.records();
    assert!(after[0].play_url().is_some());
    assert!(after[1].play_url().is_some());
    assert_eq!(after[2], before[2]);

    assert!(matches!(
        outcome.into_result(),
        Err(LibraryError::PartialBatchFailure {
            succeeded: 2,
            failed: 1
        })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_failed_rerun_keeps_last_good_link() {
    let remote = MockRemote::with_videos(3);
    let session = context(remote.clone()).open(folder());
    session.load(false).await.unwrap();

    session.request_batch_refresh(None).unwrap();
    session.confirm_batch_refresh().await.unwrap();
    let first = session.records();

    tokio::time::advance(Duration::from_secs(5)).await;
    remote.fail_links(&["ep1", "ep2", "ep3"]);
    session.request_batch_refresh(None).unwrap();
    let outcome = session.confirm_batch_refresh().await.unwrap();

    assert_eq!(outcome.failure_count, 3);
    let second = session.records();
    for (a, b) in first.iter().zip(&second) {
        assert_eq!(a.updated_at(), b.updated_at());
        assert_eq!(a.play_url(), b.play_url());
    }
}

#[tokio::test(start_paused = true)]
async fn test_chunk_transport_error_fails_whole_chunk_only() {
    let remote = MockRemote::with_videos(4);
    let session = context(remote.clone()).open(folder());
    session.load(false).await.unwrap();

    remote.fail_refresh_calls(RemoteError::Transport("connection reset".to_string()));
    session.request_batch_refresh(None).unwrap();
    let outcome = session.confirm_batch_refresh().await.unwrap();

    assert_eq!(remote.refresh_chunks().len(), 2);
    assert_eq!(outcome.failure_count, 4);
    assert_eq!(outcome.status, BatchStatus::Completed);
    assert!(session.records().iter().all(|r| r.play_url().is_none()));
}

#[tokio::test(start_paused = true)]
async fn test_second_job_for_same_folder_is_rejected() {
    let remote = MockRemote::with_videos(7);
    let ctx = context(remote.clone());
    let first = ctx.open(folder());
    let second = ctx.open(folder());
    first.load(false).await.unwrap();
    second.load(false).await.unwrap();

    first.request_batch_refresh(None).unwrap();
    let handle = first.spawn_confirmed_batch_refresh().unwrap();
    tokio::task::yield_now().await;
    let calls_before = remote.refresh_chunks().len();

    let err = second.request_batch_refresh(None).unwrap_err();
    assert_eq!(
        err,
        LibraryError::Precondition(PreconditionFailure::AlreadyRunning(folder()))
    );

    let orchestrator = ctx.orchestrator();
    let direct = orchestrator.start(&folder(), ids(&["ep1"]), ctx.credentials());
    assert!(matches!(
        direct.err(),
        Some(PreconditionFailure::AlreadyRunning(_))
    ));
    assert_eq!(remote.refresh_chunks().len(), calls_before);

    handle.await.unwrap();
    assert_eq!(remote.refresh_chunks().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_other_view_cannot_start_while_folder_job_runs() {
    let remote = MockRemote::with_videos(7);
    let ctx = context(remote.clone());
    let first = ctx.open(folder());
    let second = ctx.open(folder());
    first.load(false).await.unwrap();
    second.load(false).await.unwrap();

    first.request_batch_refresh(None).unwrap();
    second.request_batch_refresh(None).unwrap();
    let handle = first.spawn_confirmed_batch_refresh().unwrap();
    let already_running =
        LibraryError::Precondition(PreconditionFailure::AlreadyRunning(folder()));

    let err = second.confirm_batch_refresh().await.unwrap_err();
    assert_eq!(err, already_running);
    assert!(matches!(second.view_state(), ViewState::Confirming { .. }));

    second.cancel_batch_refresh();
    let err = second.refresh_link(&EpisodeId::from("ep1")).await.unwrap_err();
    assert_eq!(err, already_running);

    // Past the refresh cooldown the job still owns the folder, and the
    // rejected start must not stamp a new cooldown.
    tokio::time::advance(Duration::from_secs(3)).await;
    let err = second.refresh_link(&EpisodeId::from("ep1")).await.unwrap_err();
    assert_eq!(err, already_running);
    let key = ActionKey::new(ActionClass::RefreshLinks, &folder());
    assert_eq!(ctx.governor().retry_after(&key), None);
    assert_eq!(second.view_state(), ViewState::Ready);

    handle.await.unwrap();
    assert_eq!(remote.refresh_chunks().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_throttled_start_releases_folder_and_keeps_confirmation() {
    let remote = MockRemote::with_videos(4);
    let ctx = context(remote.clone());
    let session = ctx.open(folder());
    session.load(false).await.unwrap();

    session.refresh_link(&EpisodeId::from("ep1")).await.unwrap();

    let err = session
        .refresh_link(&EpisodeId::from("ep2"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        LibraryError::Throttled {
            action: ActionClass::RefreshLinks,
            ..
        }
    ));
    assert!(!ctx.orchestrator().is_running(&folder()));

    session.request_batch_refresh(None).unwrap();
    let err = session.confirm_batch_refresh().await.unwrap_err();
    assert!(matches!(err, LibraryError::Throttled { .. }));
    assert!(!ctx.orchestrator().is_running(&folder()));
    assert!(matches!(session.view_state(), ViewState::Confirming { .. }));

    tokio::time::advance(Duration::from_secs(2)).await;
    let outcome = session.confirm_batch_refresh().await.unwrap();
    assert_eq!(outcome.success_count, 4);
    assert_eq!(session.view_state(), ViewState::Ready);
    assert_eq!(remote.refresh_chunks().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_running_job_blocks_reload_but_not_rename() {
    let remote = MockRemote::with_videos(4);
    let session = context(remote.clone()).open(folder());
    session.load(false).await.unwrap();

    session.request_batch_refresh(None).unwrap();
    let handle = session.spawn_confirmed_batch_refresh().unwrap();

    assert!(matches!(
        session.view_state(),
        ViewState::BatchRunning { .. }
    ));
    assert!(!session.allows(ViewAction::Load));
    assert!(!session.allows(ViewAction::BatchRefresh));
    assert!(session.allows(ViewAction::Rename));

    let err = session.load(true).await.unwrap_err();
    assert!(matches!(
        err,
        LibraryError::Precondition(PreconditionFailure::ActionBlocked {
            action: ViewAction::Load,
            ..
        })
    ));

    session.rename(&EpisodeId::from("ep4"), "Finale").await.unwrap();

    let progress = session.batch_progress().unwrap();
    assert_eq!(progress.total, 4);

    handle.await.unwrap();
    assert_eq!(session.view_state(), ViewState::Ready);
    assert_eq!(session.records()[3].name(), "Finale.mkv");
    assert!(session.records()[3].play_url().is_some());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_skips_unsent_chunks() {
    let remote = MockRemote::with_videos(7);
    let session = context(remote.clone()).open(folder());
    session.load(false).await.unwrap();

    session.request_batch_refresh(None).unwrap();
    let handle = session.spawn_confirmed_batch_refresh().unwrap();
    let mut progress = session.watch_batch().unwrap();
    progress.wait_for(|p| p.completed == 3).await.unwrap();

    assert!(session.cancel_running_batch());
    let outcome = handle.await.unwrap();

    assert_eq!(outcome.status, BatchStatus::Aborted);
    assert_eq!(outcome.success_count, 3);
    assert_eq!(outcome.skipped_count, 4);
    assert_eq!(remote.refresh_chunks().len(), 1);
    assert_eq!(
        outcome.result_for(&EpisodeId::from("ep5")),
        Some(&RefreshResult::Skipped)
    );
    assert!(session.records()[4].play_url().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_job_finishes_in_background_after_close() {
    let remote = MockRemote::with_videos(4);
    let ctx = context(remote.clone());
    let session = ctx.open(folder());
    session.load(false).await.unwrap();

    session.request_batch_refresh(None).unwrap();
    let handle = session.spawn_confirmed_batch_refresh().unwrap();
    session.close();

    let outcome = handle.await.unwrap();
    assert_eq!(outcome.status, BatchStatus::Completed);
    assert_eq!(remote.refresh_chunks().len(), 2);

    let reopened = ctx.open(folder());
    reopened.load(false).await.unwrap();
    assert!(reopened.records().iter().all(|r| r.play_url().is_some()));
}

#[tokio::test(start_paused = true)]
async fn test_close_cancels_when_configured() {
    let remote = MockRemote::with_videos(7);
    let mut config = Config::default();
    config.batch.cancel_on_close = true;
    let session = context_with(remote.clone(), config).open(folder());
    session.load(false).await.unwrap();

    session.request_batch_refresh(None).unwrap();
    let handle = session.spawn_confirmed_batch_refresh().unwrap();
    let mut progress = session.watch_batch().unwrap();
    progress.wait_for(|p| p.completed == 3).await.unwrap();
    session.close();

    let outcome = handle.await.unwrap();
    assert_eq!(outcome.status, BatchStatus::Aborted);
    assert_eq!(remote.refresh_chunks().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_configured_policy_is_honoured() {
    let remote = MockRemote::with_videos(5);
    let mut config = Config::default();
    config.batch.chunk_size = 2;
    config.batch.inter_chunk_delay_seconds = 12;
    let session = context_with(remote.clone(), config).open(folder());
    session.load(false).await.unwrap();

    session.request_batch_refresh(None).unwrap();
    session.confirm_batch_refresh().await.unwrap();

    let sizes: Vec<usize> = remote.refresh_chunks().iter().map(Vec::len).collect();
    assert_eq!(sizes, vec![2, 2, 1]);
    let times = remote.refresh_times();
    assert_eq!(times[1] - times[0], Duration::from_secs(12));
}

#[tokio::test(start_paused = true)]
async fn test_explicit_targets_and_selection() {
    let remote = MockRemote::with_videos(5);
    let session = context(remote.clone()).open(folder());
    session.load(false).await.unwrap();

    let targets = session
        .request_batch_refresh(Some(ids(&["ep2", "missing", "ep2", "ep4"])))
        .unwrap();
    assert_eq!(targets, ids(&["ep2", "ep4"]));
    session.cancel_batch_refresh();

    session.select(&EpisodeId::from("ep5")).unwrap();
    let targets = session.request_batch_refresh(None).unwrap();
    assert_eq!(targets, ids(&["ep5"]));
    session.cancel_batch_refresh();

    let err = session
        .request_batch_refresh(Some(ids(&["missing"])))
        .unwrap_err();
    assert_eq!(err, LibraryError::Precondition(PreconditionFailure::NoTargets));
    assert!(remote.refresh_chunks().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_single_link_refresh() {
    let remote = MockRemote::with_videos(2);
    let session = context(remote.clone()).open(folder());
    session.load(false).await.unwrap();

    let result = session.refresh_link(&EpisodeId::from("ep2")).await.unwrap();
    assert!(matches!(result, RefreshResult::Refreshed { .. }));
    assert_eq!(remote.refresh_chunks(), vec![ids(&["ep2"])]);
    assert!(session.records()[1].play_url().is_some());
    assert!(session.records()[0].play_url().is_none());

    remote.fail_links(&["ep1"]);
    tokio::time::advance(Duration::from_secs(2)).await;
    let err = session.refresh_link(&EpisodeId::from("ep1")).await.unwrap_err();
    assert!(matches!(err, LibraryError::RemoteFailure { .. }));
    assert_eq!(session.view_state(), ViewState::Ready);
}
