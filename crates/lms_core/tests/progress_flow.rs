//! Integration tests for the progress tracker and completion aggregation,
//! driven through in-memory port implementations.

mod support;

use chrono::Utc;
use uuid::Uuid;

use lms_core::ports::PortError;

#[tokio::test]
async fn four_lecture_walkthrough() {
    let h = support::harness();
    let course = support::course(100.0, 4);
    let (l1, l2) = (course.lecture_ids[0], course.lecture_ids[1]);
    let course_id = course.id;
    h.catalog.add_course(course).await;
    let user = Uuid::new_v4();
    let now = Utc::now();

    let p = h
        .tracker
        .mark_lecture(user, course_id, l1, true, None, now)
        .await
        .unwrap();
    assert_eq!(p.completion_percentage, 25);
    assert!(!p.is_completed);

    let p = h
        .tracker
        .mark_lecture(user, course_id, l2, true, None, now)
        .await
        .unwrap();
    assert_eq!(p.completion_percentage, 50);

    let p = h.tracker.reset(user, course_id, now).await.unwrap();
    assert_eq!(p.completion_percentage, 0);
    assert!(!p.is_completed);
    assert!(p.lectures.iter().all(|lp| !lp.is_completed));

    let p = h.tracker.mark_all_completed(user, course_id, now).await.unwrap();
    assert_eq!(p.completion_percentage, 100);
    assert!(p.is_completed);
}

#[tokio::test]
async fn percentage_is_monotonic_under_pure_completion() {
    let h = support::harness();
    let course = support::course(100.0, 7);
    let lecture_ids = course.lecture_ids.clone();
    let course_id = course.id;
    h.catalog.add_course(course).await;
    let user = Uuid::new_v4();
    let now = Utc::now();

    let mut last = 0u8;
    for lecture_id in lecture_ids {
        let p = h
            .tracker
            .mark_lecture(user, course_id, lecture_id, true, None, now)
            .await
            .unwrap();
        assert!(p.completion_percentage >= last);
        last = p.completion_percentage;
    }
    assert_eq!(last, 100);
}

#[tokio::test]
async fn completed_flag_tracks_the_hundred_percent_boundary() {
    let h = support::harness();
    let course = support::course(50.0, 2);
    let (l1, l2) = (course.lecture_ids[0], course.lecture_ids[1]);
    let course_id = course.id;
    h.catalog.add_course(course).await;
    let user = Uuid::new_v4();
    let now = Utc::now();

    let p = h
        .tracker
        .mark_lecture(user, course_id, l1, true, None, now)
        .await
        .unwrap();
    assert_eq!((p.completion_percentage, p.is_completed), (50, false));

    let p = h
        .tracker
        .mark_lecture(user, course_id, l2, true, None, now)
        .await
        .unwrap();
    assert_eq!((p.completion_percentage, p.is_completed), (100, true));

    // Un-completing a lecture drops the flag with the percentage.
    let p = h
        .tracker
        .mark_lecture(user, course_id, l2, false, None, now)
        .await
        .unwrap();
    assert_eq!((p.completion_percentage, p.is_completed), (50, false));
}

#[tokio::test]
async fn reset_is_idempotent() {
    let h = support::harness();
    let course = support::course(10.0, 3);
    let l1 = course.lecture_ids[0];
    let course_id = course.id;
    h.catalog.add_course(course).await;
    let user = Uuid::new_v4();
    let now = Utc::now();

    h.tracker
        .mark_lecture(user, course_id, l1, true, Some(30.0), now)
        .await
        .unwrap();

    let once = h.tracker.reset(user, course_id, now).await.unwrap();
    let twice = h.tracker.reset(user, course_id, now).await.unwrap();

    assert_eq!(once.completion_percentage, 0);
    assert_eq!(twice.completion_percentage, 0);
    assert!(!twice.is_completed);
    assert_eq!(once.lectures.len(), twice.lectures.len());
    assert!(twice.lectures.iter().all(|lp| !lp.is_completed));
    // Watch time survives a reset; only completion flags are cleared.
    assert_eq!(twice.lectures[0].watch_time_secs, 30.0);
}

#[tokio::test]
async fn zero_lecture_course_never_reports_completed() {
    let h = support::harness();
    let course = support::course(10.0, 0);
    let course_id = course.id;
    h.catalog.add_course(course).await;
    let user = Uuid::new_v4();
    let now = Utc::now();

    let p = h.tracker.get_or_create(user, course_id, now).await.unwrap();
    assert_eq!(p.completion_percentage, 0);
    assert!(!p.is_completed);

    let p = h.tracker.mark_all_completed(user, course_id, now).await.unwrap();
    assert_eq!(p.completion_percentage, 0);
    assert!(!p.is_completed);
}

#[tokio::test]
async fn progress_is_created_lazily_and_only_once() {
    let h = support::harness();
    let course = support::course(10.0, 2);
    let course_id = course.id;
    h.catalog.add_course(course).await;
    let user = Uuid::new_v4();
    let now = Utc::now();

    assert_eq!(h.progress.record_count().await, 0);

    let first = h.tracker.get_or_create(user, course_id, now).await.unwrap();
    let second = h.tracker.get_or_create(user, course_id, now).await.unwrap();
    assert_eq!(h.progress.record_count().await, 1);
    assert!(first.lectures.is_empty());
    assert!(second.lectures.is_empty());
}

#[tokio::test]
async fn marking_an_unknown_course_or_lecture_is_not_found() {
    let h = support::harness();
    let course = support::course(10.0, 2);
    let course_id = course.id;
    h.catalog.add_course(course).await;
    let user = Uuid::new_v4();
    let now = Utc::now();

    let err = h
        .tracker
        .mark_lecture(user, Uuid::new_v4(), Uuid::new_v4(), true, None, now)
        .await
        .unwrap_err();
    assert!(matches!(err, PortError::NotFound(_)));

    // Known course, lecture from some other course.
    let err = h
        .tracker
        .mark_lecture(user, course_id, Uuid::new_v4(), true, None, now)
        .await
        .unwrap_err();
    assert!(matches!(err, PortError::NotFound(_)));
}

#[tokio::test]
async fn completing_or_resetting_a_course_never_started_is_not_found() {
    let h = support::harness();
    let course = support::course(10.0, 2);
    let course_id = course.id;
    h.catalog.add_course(course).await;
    let user = Uuid::new_v4();
    let now = Utc::now();

    let err = h.tracker.mark_all_completed(user, course_id, now).await.unwrap_err();
    assert!(matches!(err, PortError::NotFound(_)));

    let err = h.tracker.reset(user, course_id, now).await.unwrap_err();
    assert!(matches!(err, PortError::NotFound(_)));
}

#[tokio::test]
async fn negative_watch_time_is_rejected() {
    let h = support::harness();
    let course = support::course(10.0, 1);
    let l1 = course.lecture_ids[0];
    let course_id = course.id;
    h.catalog.add_course(course).await;
    let now = Utc::now();

    let err = h
        .tracker
        .mark_lecture(Uuid::new_v4(), course_id, l1, true, Some(-1.0), now)
        .await
        .unwrap_err();
    assert!(matches!(err, PortError::Validation(_)));
}

#[tokio::test]
async fn watch_time_never_decreases() {
    let h = support::harness();
    let course = support::course(10.0, 1);
    let l1 = course.lecture_ids[0];
    let course_id = course.id;
    h.catalog.add_course(course).await;
    let user = Uuid::new_v4();
    let now = Utc::now();

    h.tracker
        .mark_lecture(user, course_id, l1, false, Some(120.0), now)
        .await
        .unwrap();
    let p = h
        .tracker
        .mark_lecture(user, course_id, l1, false, Some(45.0), now)
        .await
        .unwrap();
    assert_eq!(p.entry(l1).unwrap().watch_time_secs, 120.0);
}

#[tokio::test]
async fn concurrent_marks_on_distinct_lectures_both_survive() {
    let h = support::harness();
    let course = support::course(10.0, 2);
    let (l1, l2) = (course.lecture_ids[0], course.lecture_ids[1]);
    let course_id = course.id;
    h.catalog.add_course(course).await;
    let user = Uuid::new_v4();
    let now = Utc::now();

    h.tracker.get_or_create(user, course_id, now).await.unwrap();

    let (a, b) = tokio::join!(
        h.tracker.mark_lecture(user, course_id, l1, true, None, now),
        h.tracker.mark_lecture(user, course_id, l2, true, None, now),
    );
    a.unwrap();
    b.unwrap();

    let p = h.tracker.get_or_create(user, course_id, now).await.unwrap();
    assert!(p.entry(l1).unwrap().is_completed);
    assert!(p.entry(l2).unwrap().is_completed);
}

#[tokio::test]
async fn lectures_added_after_completion_recompute_downward() {
    let h = support::harness();
    let course = support::course(10.0, 2);
    let mut lecture_ids = course.lecture_ids.clone();
    let course_id = course.id;
    h.catalog.add_course(course).await;
    let user = Uuid::new_v4();
    let now = Utc::now();

    for &lecture_id in &lecture_ids {
        h.tracker
            .mark_lecture(user, course_id, lecture_id, true, None, now)
            .await
            .unwrap();
    }
    let view = h.tracker.view(user, course_id).await.unwrap();
    assert_eq!(view.completion_percentage, 100);

    // Course grows by two lectures after the fact.
    lecture_ids.push(Uuid::new_v4());
    lecture_ids.push(Uuid::new_v4());
    h.catalog.set_lectures(course_id, lecture_ids).await;

    let view = h.tracker.view(user, course_id).await.unwrap();
    assert_eq!(view.completion_percentage, 50);
    assert!(!view.is_completed);
}

#[tokio::test]
async fn stale_entries_for_removed_lectures_still_count() {
    let h = support::harness();
    let course = support::course(10.0, 4);
    let lecture_ids = course.lecture_ids.clone();
    let course_id = course.id;
    h.catalog.add_course(course).await;
    let user = Uuid::new_v4();
    let now = Utc::now();

    for &lecture_id in &lecture_ids[..2] {
        h.tracker
            .mark_lecture(user, course_id, lecture_id, true, None, now)
            .await
            .unwrap();
    }

    // Drop one completed lecture from the course; its entry remains and
    // still counts against the shrunken total.
    h.catalog
        .set_lectures(course_id, lecture_ids[1..].to_vec())
        .await;

    let view = h.tracker.view(user, course_id).await.unwrap();
    assert_eq!(view.completion_percentage, 67);
}

#[tokio::test]
async fn view_of_untouched_course_is_empty_and_persists_nothing() {
    let h = support::harness();
    let course = support::course(10.0, 3);
    let course_id = course.id;
    h.catalog.add_course(course).await;
    let user = Uuid::new_v4();

    let view = h.tracker.view(user, course_id).await.unwrap();
    assert!(view.lectures.is_empty());
    assert_eq!(view.completion_percentage, 0);
    assert!(!view.is_completed);
    assert_eq!(h.progress.record_count().await, 0);
}
