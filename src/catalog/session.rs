//! Session management for the legacy catalog.
//!
//! The catalog stores the selected semester in server-side PHP session
//! state, so every session wraps its own cookie jar and must be treated as
//! sequential: a worker holds one session exclusively while talking to the
//! server (mediated by [`crate::catalog::pool::SessionPool`]).

use crate::catalog::errors::CatalogError;
use crate::catalog::parse::{
    self, FachSemesterOption, ScheduleTable, SemesterOption, StudyProgramOption,
};
use crate::config::Config;
use crate::error::Result;
use anyhow::Context;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Accept-Language sent on every request; the catalog localizes by it.
const ACCEPT_LANGUAGE: &str = "de-DE,de;q=0.9,en;q=0.6";

/// Form value of the semester-switch submit button.
const SELECT_SUBMIT: &str = "Auswählen";

/// One cookie-bearing conversation with the catalog.
pub struct CatalogSession {
    client: Client,
    base_url: Url,
    respectful_delay: Duration,
    fix_legacy: bool,
}

impl CatalogSession {
    /// Creates a fresh session with its own cookie jar.
    pub fn new(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .cookie_store(true)
            .user_agent(config.user_agent.as_str())
            .tcp_keepalive(Some(Duration::from_secs(60 * 5)))
            .connect_timeout(Duration::from_secs(10))
            .timeout(config.timeout)
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(&config.base_url)
            .with_context(|| format!("Invalid base URL: {}", config.base_url))?;

        Ok(Self {
            client,
            base_url,
            respectful_delay: config.respectful_delay,
            fix_legacy: config.encoding_fix_legacy,
        })
    }

    /// Whether the legacy encoding repair is enabled for this session.
    pub fn fix_legacy(&self) -> bool {
        self.fix_legacy
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .with_context(|| format!("Invalid catalog path: {path}"))
    }

    async fn politeness_pause(&self) {
        if !self.respectful_delay.is_zero() {
            tokio::time::sleep(self.respectful_delay).await;
        }
    }

    /// Issues a GET and returns the body, enforcing 2xx and non-empty.
    async fn get(&self, path: &str, referer: Option<&str>) -> Result<String> {
        self.politeness_pause().await;

        let mut request = self
            .client
            .get(self.url(path)?)
            .header("Accept-Language", ACCEPT_LANGUAGE);
        if let Some(referer) = referer {
            request = request.header("Referer", self.url(referer)?.to_string());
        }

        let response = request.send().await.map_err(CatalogError::Transport)?;
        Self::read_body(path, response).await
    }

    /// Issues a form POST and returns the body, enforcing 2xx and non-empty.
    async fn post_form(
        &self,
        path: &str,
        form: &[(&str, &str)],
        referer: Option<&str>,
    ) -> Result<String> {
        self.politeness_pause().await;

        let mut request = self
            .client
            .post(self.url(path)?)
            .header("Accept-Language", ACCEPT_LANGUAGE)
            .form(form);
        if let Some(referer) = referer {
            request = request.header("Referer", self.url(referer)?.to_string());
        }

        let response = request.send().await.map_err(CatalogError::Transport)?;
        Self::read_body(path, response).await
    }

    async fn read_body(path: &str, response: reqwest::Response) -> Result<String> {
        let status = response.status();
        let body = response.text().await.map_err(CatalogError::Transport)?;

        if !status.is_success() {
            return Err(CatalogError::status(path, status, &body).into());
        }
        if body.trim().is_empty() {
            return Err(CatalogError::EmptyBody {
                path: path.to_string(),
            }
            .into());
        }

        Ok(body)
    }

    /// Reads the semester dropdown from `index.html`.
    pub async fn fetch_semester_options(&self) -> Result<Vec<SemesterOption>> {
        let body = self.get("index.html", None).await?;
        let options = parse::parse_semester_options(&body);
        debug!(count = options.len(), "Fetched semester options");
        Ok(options)
    }

    /// Switches the server-side session to the given semester.
    ///
    /// The response should echo the selection in its dropdown; the server
    /// occasionally delays the echo, so a mismatch is logged rather than
    /// treated as a failure.
    pub async fn select_semester(&self, display_name: &str) -> Result<()> {
        let form = [
            ("sem_wahl", display_name),
            ("wechsel", "4"),
            ("senden", SELECT_SUBMIT),
        ];
        let body = self.post_form("index.html", &form, None).await?;

        match parse::selected_semester(&body) {
            Some(echoed) if echoed == display_name => {
                debug!(semester = display_name, "Semester selected")
            }
            echoed => warn!(
                semester = display_name,
                echoed = echoed.as_deref().unwrap_or(""),
                "Semester selection not echoed by server"
            ),
        }
        Ok(())
    }

    /// Reads the study program list from `verz.html`.
    pub async fn fetch_study_programs(&self) -> Result<Vec<StudyProgramOption>> {
        let body = self.get("verz.html", Some("index.html")).await?;
        let programs = parse::parse_study_programs(&body, self.fix_legacy);
        debug!(count = programs.len(), "Fetched study programs");
        Ok(programs)
    }

    /// Opens a study program's default fach-semester page.
    pub async fn open_program(&self, program: &StudyProgramOption) -> Result<String> {
        self.get(&program.href, Some("verz.html")).await
    }

    /// Requests the schedule table of a specific fach-semester.
    pub async fn open_program_semester(
        &self,
        program: &StudyProgramOption,
        fach_semester: &str,
    ) -> Result<String> {
        let referer = format!("stgvrz.html?stdg={}", urlencoding::encode(&program.code));
        let form = [
            ("stdg", program.code.as_str()),
            ("stdg1", program.display_name.as_str()),
            ("semest", fach_semester),
            ("popup3", ""),
        ];
        self.post_form("stgvrz.html", &form, Some(&referer)).await
    }

    /// Parses a schedule page fetched through this session.
    pub fn parse_schedule(&self, body: &str) -> ScheduleTable {
        parse::parse_schedule_rows(body, self.fix_legacy)
    }

    /// Parses the fach-semester dropdown of a schedule page.
    pub fn parse_fach_semesters(&self, body: &str) -> Vec<FachSemesterOption> {
        parse::parse_fach_semester_options(body)
    }
}
