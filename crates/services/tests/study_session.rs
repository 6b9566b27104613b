use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use coursetime_core::activity::{ActivityPhase, InteractionKind};
use coursetime_core::aggregate::ProgressMap;
use coursetime_core::model::{
    Catalog, CatalogDefinition, ChapterDefinition, ChapterId, FormationDefinition, FormationId,
    LearnerId, ModuleDefinition, ModuleId, ProgressRecord, UnitDefinition, UnitId,
};
use coursetime_core::settings::{ActivitySettings, TimerSettings};
use coursetime_core::time::{fixed_clock, fixed_now};
use services::{
    ActivityService, CloseReason, IdentityProvider, SessionClock, StaticIdentity, StudyError,
    StudySessionService,
};
use storage::repository::{
    InMemoryRepository, LastOpenedRepository, ProgressRepository, StorageError, WriteOutcome,
};

const LEARNER: LearnerId = LearnerId::new(7);

fn catalog() -> Arc<Catalog> {
    let course = |id: u64| UnitDefinition {
        id: UnitId::new(id),
        title: format!("Course {id}"),
        expected_duration_secs: Some(600),
    };
    let definition = CatalogDefinition {
        formations: vec![FormationDefinition {
            id: FormationId::new(1),
            name: "Formation".into(),
            modules: vec![ModuleDefinition {
                id: ModuleId::new(1),
                name: "Module".into(),
                common_core: Some(true),
                chapters: vec![ChapterDefinition {
                    id: ChapterId::new(1),
                    name: "Chapter".into(),
                    sub_chapters: Vec::new(),
                    courses: vec![course(1), course(2)],
                }],
            }],
        }],
    };
    Arc::new(Catalog::from_definition(definition, 3_600).unwrap())
}

struct Harness {
    repo: InMemoryRepository,
    identity: Arc<StaticIdentity>,
    activity: ActivityService,
    sessions: StudySessionService,
}

fn harness(activity_settings: ActivitySettings) -> Harness {
    let repo = InMemoryRepository::new();
    harness_with(activity_settings, repo.clone(), Arc::new(repo))
}

fn harness_with(
    activity_settings: ActivitySettings,
    repo: InMemoryRepository,
    progress: Arc<dyn ProgressRepository>,
) -> Harness {
    let clock = SessionClock::anchored(&fixed_clock());
    let identity = Arc::new(StaticIdentity::new(LEARNER));
    let activity = ActivityService::new(activity_settings, clock, identity.clone());
    let sessions = StudySessionService::new(
        clock,
        TimerSettings::default(),
        catalog(),
        progress,
        Arc::new(repo.clone()),
        identity.clone(),
    );
    Harness {
        repo,
        identity,
        activity,
        sessions,
    }
}

fn short_timeout() -> ActivitySettings {
    ActivitySettings::new(60, 30).unwrap()
}

async fn stored_secs(repo: &InMemoryRepository, unit: u64) -> u64 {
    repo.read_progress(LEARNER, UnitId::new(unit))
        .await
        .unwrap()
        .map_or(0, |record| record.time_spent_secs())
}

#[tokio::test(start_paused = true)]
async fn resumes_from_the_stored_time() {
    let h = harness(ActivitySettings::default());
    let earlier =
        ProgressRecord::from_elapsed(120, 600, 0, fixed_now() - chrono::Duration::hours(1));
    h.repo
        .write_progress(LEARNER, UnitId::new(1), &earlier)
        .await
        .unwrap();

    let session = h.sessions.open(UnitId::new(1), &h.activity).await.unwrap();
    assert_eq!(session.progress().time_spent_secs(), 120);

    tokio::time::sleep(Duration::from_secs(10)).await;
    let closed = session.close().await.unwrap();
    assert_eq!(closed.reason, CloseReason::Closed);
    assert!(closed.persisted);
    assert_eq!(closed.record.time_spent_secs(), 130);
    assert_eq!(stored_secs(&h.repo, 1).await, 130);
}

#[tokio::test(start_paused = true)]
async fn warning_window_time_is_not_counted() {
    let h = harness(short_timeout());
    let _countdown = h.activity.spawn_countdown();
    let session = h.sessions.open(UnitId::new(1), &h.activity).await.unwrap();

    // Warning opens at 30 s; the learner comes back at 40 s.
    tokio::time::sleep(Duration::from_secs(40)).await;
    assert_eq!(h.activity.state().phase, ActivityPhase::WarningWindow);
    assert_eq!(session.progress().time_spent_secs(), 30);
    h.activity.record(InteractionKind::PointerMove);

    tokio::time::sleep(Duration::from_secs(5)).await;
    let closed = session.close().await.unwrap();
    assert_eq!(closed.record.time_spent_secs(), 35);
}

#[tokio::test(start_paused = true)]
async fn flushes_periodically_while_open() {
    let h = harness(ActivitySettings::default());
    let session = h.sessions.open(UnitId::new(2), &h.activity).await.unwrap();

    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(stored_secs(&h.repo, 2).await, 30);

    tokio::time::sleep(Duration::from_secs(34)).await;
    assert_eq!(stored_secs(&h.repo, 2).await, 60);
    assert_eq!(session.progress().time_spent_secs(), 65);

    session.close().await.unwrap();
    assert_eq!(stored_secs(&h.repo, 2).await, 65);
}

#[tokio::test(start_paused = true)]
async fn forced_logout_flushes_then_ends_the_learner_session() {
    let h = harness(short_timeout());
    let _countdown = h.activity.spawn_countdown();
    let session = h.sessions.open(UnitId::new(1), &h.activity).await.unwrap();

    h.identity.wait_ended().await;
    let closed = session.finished().await.unwrap();
    assert_eq!(closed.reason, CloseReason::ForcedLogout);
    assert_eq!(closed.record.time_spent_secs(), 30);
    assert_eq!(stored_secs(&h.repo, 1).await, 30);
    assert_eq!(h.identity.current_learner_id(), None);

    let reopened = h.sessions.open(UnitId::new(2), &h.activity).await;
    assert!(matches!(reopened, Err(StudyError::NoLearner)));
}

/// Counts `end_session` calls and checks both units were stored before the first one.
struct CountingIdentity {
    repo: InMemoryRepository,
    ended: AtomicUsize,
    stored_when_ended: AtomicUsize,
}

#[async_trait]
impl IdentityProvider for CountingIdentity {
    fn current_learner_id(&self) -> Option<LearnerId> {
        (self.ended.load(Ordering::SeqCst) == 0).then_some(LEARNER)
    }

    async fn end_session(&self) {
        let stored = self
            .repo
            .list_progress(LEARNER, &[UnitId::new(1), UnitId::new(2)])
            .await
            .unwrap()
            .len();
        self.stored_when_ended.store(stored, Ordering::SeqCst);
        self.ended.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test(start_paused = true)]
async fn forced_logout_ends_the_learner_session_once_for_all_open_units() {
    let repo = InMemoryRepository::new();
    let identity = Arc::new(CountingIdentity {
        repo: repo.clone(),
        ended: AtomicUsize::new(0),
        stored_when_ended: AtomicUsize::new(0),
    });
    let clock = SessionClock::anchored(&fixed_clock());
    let activity = ActivityService::new(short_timeout(), clock, identity.clone());
    let sessions = StudySessionService::new(
        clock,
        TimerSettings::default(),
        catalog(),
        Arc::new(repo.clone()),
        Arc::new(repo.clone()),
        identity.clone(),
    );
    let _countdown = activity.spawn_countdown();
    let first = sessions.open(UnitId::new(1), &activity).await.unwrap();
    let second = sessions.open(UnitId::new(2), &activity).await.unwrap();

    assert_eq!(first.finished().await.unwrap().reason, CloseReason::ForcedLogout);
    assert_eq!(second.finished().await.unwrap().reason, CloseReason::ForcedLogout);
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(identity.ended.load(Ordering::SeqCst), 1);
    assert_eq!(identity.stored_when_ended.load(Ordering::SeqCst), 2);
    assert_eq!(stored_secs(&repo, 1).await, 30);
    assert_eq!(stored_secs(&repo, 2).await, 30);
}

#[tokio::test(start_paused = true)]
async fn opening_after_forced_logout_is_refused() {
    let h = harness(short_timeout());
    // Activity of another sign-in whose logout already happened; the learner
    // behind `h.sessions` is still signed in.
    let other = ActivityService::new(
        short_timeout(),
        SessionClock::anchored(&fixed_clock()),
        Arc::new(StaticIdentity::new(LEARNER)),
    );
    let mut state = other.subscribe();
    let _countdown = other.spawn_countdown();
    state
        .wait_for(|s| s.phase == ActivityPhase::ForcedLogout)
        .await
        .unwrap();

    let result = h.sessions.open(UnitId::new(1), &other).await;
    assert!(matches!(result, Err(StudyError::SessionEnded)));
    assert_eq!(stored_secs(&h.repo, 1).await, 0);
}

#[tokio::test(start_paused = true)]
async fn position_report_becomes_the_time_spent() {
    let h = harness(ActivitySettings::default());
    let session = h.sessions.open(UnitId::new(1), &h.activity).await.unwrap();

    tokio::time::sleep(Duration::from_secs(5)).await;
    session.report_position(300).await.unwrap();
    tokio::time::sleep(Duration::from_secs(10)).await;

    let closed = session.close().await.unwrap();
    assert_eq!(closed.record.time_spent_secs(), 310);
    assert_eq!(closed.record.last_position_secs(), 300);
}

#[tokio::test(start_paused = true)]
async fn opening_records_the_last_opened_unit() {
    let h = harness(ActivitySettings::default());
    let session = h.sessions.open(UnitId::new(2), &h.activity).await.unwrap();

    let last = h
        .repo
        .read_last_opened(LEARNER, FormationId::new(1))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(last.unit_id, UnitId::new(2));
    assert_eq!(last.opened_at, fixed_now());
    session.close().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn dropped_handle_still_writes_the_final_record() {
    let h = harness(ActivitySettings::default());
    let session = h.sessions.open(UnitId::new(1), &h.activity).await.unwrap();

    tokio::time::sleep(Duration::from_secs(12)).await;
    drop(session);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(stored_secs(&h.repo, 1).await, 12);
}

#[tokio::test(start_paused = true)]
async fn unknown_unit_and_anonymous_learner_are_rejected() {
    let h = harness(ActivitySettings::default());
    let result = h.sessions.open(UnitId::new(99), &h.activity).await;
    assert!(matches!(result, Err(StudyError::UnknownUnit(id)) if id == UnitId::new(99)));

    let anonymous = StudySessionService::new(
        SessionClock::anchored(&fixed_clock()),
        TimerSettings::default(),
        catalog(),
        Arc::new(h.repo.clone()),
        Arc::new(h.repo.clone()),
        Arc::new(StaticIdentity::anonymous()),
    );
    let result = anonymous.open(UnitId::new(1), &h.activity).await;
    assert!(matches!(result, Err(StudyError::NoLearner)));
}

struct UnreadableProgress;

#[async_trait]
impl ProgressRepository for UnreadableProgress {
    async fn read_progress(
        &self,
        _learner: LearnerId,
        _unit: UnitId,
    ) -> Result<Option<ProgressRecord>, StorageError> {
        Err(StorageError::Connection("offline".into()))
    }

    async fn write_progress(
        &self,
        _learner: LearnerId,
        _unit: UnitId,
        _record: &ProgressRecord,
    ) -> Result<WriteOutcome, StorageError> {
        Err(StorageError::Connection("offline".into()))
    }

    async fn list_progress(
        &self,
        _learner: LearnerId,
        _units: &[UnitId],
    ) -> Result<ProgressMap, StorageError> {
        Err(StorageError::Connection("offline".into()))
    }
}

#[tokio::test(start_paused = true)]
async fn unreadable_progress_does_not_start_from_zero() {
    let repo = InMemoryRepository::new();
    let h = harness_with(
        ActivitySettings::default(),
        repo,
        Arc::new(UnreadableProgress),
    );
    let result = h.sessions.open(UnitId::new(1), &h.activity).await;
    assert!(matches!(
        result,
        Err(StudyError::Storage(StorageError::Connection(_)))
    ));
    assert!(
        h.repo
            .read_last_opened(LEARNER, FormationId::new(1))
            .await
            .unwrap()
            .is_none()
    );
}
