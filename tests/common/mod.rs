//! Common test utilities for dailylog integration tests

use dailylog_lib::db::ActivityRecord;
use dailylog_lib::AppContext;
use tempfile::TempDir;

/// Test context holding temporary resources
#[allow(dead_code)]
pub struct TestContext {
    pub temp_dir: TempDir,
    pub ctx: AppContext,
}

#[allow(dead_code)]
impl TestContext {
    /// Open a fresh store in a temp directory, without default seeding.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("temp dir");
        let ctx = AppContext::open(temp_dir.path()).expect("open store");
        Self { temp_dir, ctx }
    }

    /// Open a fresh store and run the normal startup (default seeding,
    /// mirror priming).
    pub async fn initialized() -> Self {
        let tc = Self::new();
        tc.ctx.initialize().await.expect("initialize");
        tc
    }
}

/// Build an activity record with the fields the tests care about.
#[allow(dead_code)]
pub fn sample_activity(id: &str, person: &str, activity_name: &str) -> ActivityRecord {
    ActivityRecord {
        id: id.into(),
        person: person.into(),
        activity_name: activity_name.into(),
        date: "2026-08-30".into(),
        start_time: "07:00".into(),
        end_time: "08:00".into(),
        details: "morning session".into(),
        created_at: "2026-08-30T00:00:00Z".into(),
        created_by: "local-user".into(),
        updated_at: "2026-08-30T00:00:00Z".into(),
        updated_by: "local-user".into(),
    }
}
