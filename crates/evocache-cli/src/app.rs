//! Command execution: wires the store, cache, tracker and client together.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use tracing::warn;

use evocache_core::api::ApiClient;
use evocache_core::auth::Session;
use evocache_core::cache::{CacheAges, OfflineCache};
use evocache_core::clock::Clock;
use evocache_core::config::Config;
use evocache_core::connectivity::{ConnectivityTracker, HttpHealthProbe, StaleNotice, Subscription};
use evocache_core::models::{tasks_percent, Course, DashboardBundle};
use evocache_core::service::{LoadResult, OfflineDataService};
use evocache_core::storage::{FileStore, KeyValueStore};

use crate::Command;

/// Subdirectory of the cache dir holding the key-value store
const STORE_DIR: &str = "offline";

pub struct App {
    config: Config,
    client: ApiClient,
    cache: Arc<OfflineCache>,
    tracker: Arc<ConnectivityTracker>,
    service: OfflineDataService,
    json: bool,
    _stale: Subscription,
}

impl App {
    pub fn open(config: Config, json: bool) -> Result<Self> {
        let cache_dir = config.cache_dir()?;

        let store: Arc<dyn KeyValueStore> = Arc::new(
            FileStore::new(cache_dir.join(STORE_DIR)).context("Failed to open offline store")?,
        );

        let mut session = Session::new(cache_dir);
        if let Err(e) = session.load() {
            warn!(error = %e, "Ignoring unreadable session file");
        }
        let client = ApiClient::new(&config.api_base_url, session)?;

        let cache = Arc::new(OfflineCache::new(
            store.clone(),
            Clock::system(),
            config.cache_config(),
        ));
        let probe = Arc::new(HttpHealthProbe::with_client(
            client.http_client(),
            config.health_url(),
        ));
        let tracker = Arc::new(ConnectivityTracker::new(store, probe, true).with_cache(cache.clone()));
        let _stale = tracker.add_stale_data_listener(|notice| eprintln!("{}", stale_message(&notice)));
        let service = OfflineDataService::new(Arc::new(client.clone()), cache.clone(), tracker.clone());

        Ok(Self {
            config,
            client,
            cache,
            tracker,
            service,
            json,
            _stale,
        })
    }

    pub async fn run(&mut self, command: Command) -> Result<()> {
        match command {
            Command::Status => self.status(),
            Command::Dashboard => {
                self.check_server().await;
                let result = self.service.load_dashboard().await;
                self.print_dashboard(result)
            }
            Command::Course(id) => {
                self.check_server().await;
                let result = self.service.load_course(id).await;
                self.print_course(result)
            }
            Command::OfflineCourses => self.offline_courses(),
            Command::Remove(id) => {
                self.cache.remove_course(id);
                println!("Removed course {} from the offline cache.", id);
                Ok(())
            }
            Command::Sweep => {
                let report = self.cache.sweep_expired();
                println!(
                    "Examined {} entries, removed {}.",
                    report.examined, report.removed
                );
                Ok(())
            }
            Command::Offline(offline) => {
                self.tracker.force_offline_mode(offline);
                println!("Offline mode {}.", if offline { "on" } else { "off" });
                Ok(())
            }
            Command::Probe => {
                if self.tracker.handle_link_online().await {
                    println!("Server reachable, online.");
                } else {
                    println!("Server unreachable, still {}.", self.tracker.state());
                }
                Ok(())
            }
            Command::Login(email) => self.login(email).await,
            Command::Logout => {
                self.client.logout();
                println!("Signed out.");
                Ok(())
            }
        }
    }

    /// While online, confirm the server answers; an unreachable server puts
    /// the app offline until `probe` or `offline off`.
    async fn check_server(&self) {
        if self.tracker.is_offline() {
            return;
        }
        if !self.tracker.probe_and_update().await {
            self.tracker.handle_link_offline();
        }
    }

    fn status(&self) -> Result<()> {
        println!("Mode:      {}", self.tracker.state());
        println!("Server:    {}", self.client.base_url());
        match self.client.user() {
            Some(user) => println!("Signed in: {} <{}>", user.name, user.email),
            None if self.client.is_authenticated() => println!("Signed in: yes"),
            None => println!("Signed in: no"),
        }
        println!("Cache:     {}", self.config.cache_dir()?.display());

        let ages = self.cache.cache_ages();
        println!("Dashboard: {}", ages.dashboard_age());
        println!("Courses:   {} cached", ages.courses.len());
        Ok(())
    }

    fn offline_courses(&self) -> Result<()> {
        let CacheAges { courses, .. } = self.cache.cache_ages();
        if courses.is_empty() {
            println!("No courses cached for offline reading.");
            return Ok(());
        }
        for (id, age) in courses {
            match self.cache.get_course(id) {
                Some(course) => println!("{:>6}  {:<40}  saved {}", id, course.name, age),
                None => println!("{:>6}  (expired, removed)", id),
            }
        }
        Ok(())
    }

    async fn login(&mut self, email: String) -> Result<()> {
        let password = rpassword::prompt_password(format!("Password for {}: ", email))
            .context("Failed to read password")?;
        let user = self.client.login(&email, &password).await?;

        self.config.last_email = Some(email);
        if let Err(e) = self.config.save() {
            warn!(error = %e, "Failed to save config");
        }
        println!("Signed in as {}.", user.name);
        Ok(())
    }

    fn print_dashboard(&self, result: LoadResult<DashboardBundle>) -> Result<()> {
        let stale = result.is_stale();
        let Some(bundle) = result.into_option() else {
            println!("No internet connection and no cached dashboard.");
            return Ok(());
        };

        if self.json {
            println!("{}", serde_json::to_string_pretty(&bundle)?);
            return Ok(());
        }

        if stale {
            println!("(offline copy, synced {})\n", format_sync_time(bundle.last_sync_timestamp));
        }

        println!("Goals");
        if bundle.goals.is_empty() {
            println!("  none yet");
        }
        for goal in &bundle.goals {
            let (percent, streak) = bundle
                .progress_for(goal.id)
                .map(|p| (p.percent_complete(goal.duration), p.streak))
                .unwrap_or((0.0, 0));
            println!(
                "  {:<32} {:>5.1}%  streak {}",
                goal.goal_name, percent, streak
            );
            let tasks = goal.daily_tasks();
            for task in &tasks {
                println!("    [ ] {}", task.name);
            }
            println!("    today: {:.0}%", tasks_percent(&tasks));
        }

        println!("\nCourses");
        if bundle.courses.is_empty() {
            println!("  not enrolled in any course");
        }
        for enrolled in &bundle.courses {
            let marker = if enrolled.is_completed() { "done" } else { "" };
            println!(
                "  {:>6}  {:<32} {:>5.1}% {}",
                enrolled.course.id, enrolled.course.name, enrolled.progress, marker
            );
        }
        println!("\nBest streak: {} days", bundle.best_streak());
        Ok(())
    }

    fn print_course(&self, result: LoadResult<Course>) -> Result<()> {
        let stale = result.is_stale();
        let Some(course) = result.into_option() else {
            println!("No internet connection and this course isn't saved offline.");
            return Ok(());
        };

        if self.json {
            println!("{}", serde_json::to_string_pretty(&course)?);
            return Ok(());
        }

        if stale {
            println!("(offline copy)\n");
        }
        println!("{}", course.name);
        if !course.description.is_empty() {
            println!("{}\n", course.description);
        }
        for (i, lesson) in course.ordered_lessons().iter().enumerate() {
            println!("  {:>2}. {:<40} {:>3} min", i + 1, lesson.title, lesson.duration);
        }
        println!("\nTotal: {} min", course.total_duration());
        Ok(())
    }
}

fn stale_message(notice: &StaleNotice) -> String {
    match notice.age_minutes() {
        Some(minutes) => format!(
            "Cached dashboard is {} minutes old; run `evocache dashboard` to refresh.",
            minutes
        ),
        None => "Cached dashboard has no sync time; run `evocache dashboard` to refresh.".to_string(),
    }
}

fn format_sync_time(timestamp: Option<i64>) -> String {
    timestamp
        .and_then(DateTime::from_timestamp_millis)
        .map(|t| t.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "at an unknown time".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stale_message_points_to_dashboard_command() {
        let aged = StaleNotice {
            last_sync: Some(0),
            age_ms: Some(7 * 60_000),
        };
        let msg = stale_message(&aged);
        assert!(msg.contains("7 minutes old"));
        assert!(msg.contains("run `evocache dashboard`"));
        assert!(!msg.contains("refreshing"));

        let unknown = StaleNotice {
            last_sync: None,
            age_ms: None,
        };
        assert!(stale_message(&unknown).contains("no sync time"));
    }

    #[test]
    fn test_format_sync_time_unknown() {
        assert_eq!(format_sync_time(None), "at an unknown time");
        assert_eq!(format_sync_time(Some(0)).len(), "1970-01-01 00:00".len());
    }
}
