//! League fixtures, results and standings from football-data.org.
//!
//! Every lookup degrades to an empty list: no API key, a bad status or an
//! undecodable body are logged and rendered as "nothing to show".

use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error};

use crate::config::FixturesConfig;

/// Kick-off times are shown for the home crowd and for the club's US
/// following; both zones track their own daylight saving.
pub const UK_TIME: Tz = chrono_tz::Europe::London;
pub const PACIFIC_TIME: Tz = chrono_tz::America::Los_Angeles;

#[derive(Debug, Error)]
pub enum FixturesError {
    #[error("no football-data API key configured")]
    MissingApiKey,
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("football-data returned status {0}")]
    HttpStatus(u16),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Venue {
    Home,
    Away,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Outcome {
    #[serde(rename = "W")]
    Win,
    #[serde(rename = "D")]
    Draw,
    #[serde(rename = "L")]
    Loss,
}

impl Outcome {
    pub fn letter(&self) -> &'static str {
        match self {
            Outcome::Win => "W",
            Outcome::Draw => "D",
            Outcome::Loss => "L",
        }
    }

    pub fn from_letter(letter: &str) -> Option<Self> {
        match letter.trim() {
            "W" => Some(Outcome::Win),
            "D" => Some(Outcome::Draw),
            "L" => Some(Outcome::Loss),
            _ => None,
        }
    }
}

/// football-data.org reports form as "W,D,L,W,W", most recent first.
fn parse_form(form: Option<&str>) -> Vec<Outcome> {
    form.map(|f| f.split(',').filter_map(Outcome::from_letter).collect())
        .unwrap_or_default()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Fixture {
    pub id: u64,
    pub home_team: String,
    pub away_team: String,
    pub home_crest: Option<String>,
    pub away_crest: Option<String>,
    pub kickoff: DateTime<Utc>,
    pub competition: String,
    pub venue: Venue,
    pub opponent_id: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    pub id: u64,
    pub home_team: String,
    pub away_team: String,
    pub home_crest: Option<String>,
    pub away_crest: Option<String>,
    pub home_score: u32,
    pub away_score: u32,
    pub kickoff: DateTime<Utc>,
    pub venue: Venue,
    pub outcome: Outcome,
}

impl MatchResult {
    /// Crest of the side we played against.
    pub fn opponent_crest(&self) -> Option<&str> {
        match self.venue {
            Venue::Home => self.away_crest.as_deref(),
            Venue::Away => self.home_crest.as_deref(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Standing {
    pub position: u32,
    pub team_id: Option<u32>,
    pub team: String,
    pub crest: Option<String>,
    pub played: u32,
    pub won: u32,
    pub draw: u32,
    pub lost: u32,
    pub goals_for: i32,
    pub goals_against: i32,
    pub goal_difference: i32,
    pub points: u32,
    /// Most recent first; empty when the API omits it
    pub form: Vec<Outcome>,
    /// True for the configured team's row
    pub highlighted: bool,
}

/// Season numbers for the configured team.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TeamStats {
    pub position: u32,
    pub played: u32,
    pub won: u32,
    pub drawn: u32,
    pub lost: u32,
    pub goals_for: i32,
    pub goals_against: i32,
    pub points: u32,
    pub points_per_game: f64,
    /// Most recent first
    pub form: Vec<Outcome>,
}

impl TeamStats {
    pub fn derive(table: &[Standing], results: &[MatchResult]) -> Option<Self> {
        let row = table.iter().find(|s| s.highlighted)?;
        let points_per_game = if row.played == 0 {
            0.0
        } else {
            f64::from(row.points) / f64::from(row.played)
        };

        Some(Self {
            position: row.position,
            played: row.played,
            won: row.won,
            drawn: row.draw,
            lost: row.lost,
            goals_for: row.goals_for,
            goals_against: row.goals_against,
            points: row.points,
            points_per_game,
            form: results.iter().map(|r| r.outcome).collect(),
        })
    }
}

// Wire shapes for football-data.org v4

#[derive(Debug, Deserialize)]
struct MatchesResponse {
    #[serde(default)]
    matches: Vec<ApiMatch>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiMatch {
    id: u64,
    utc_date: DateTime<Utc>,
    competition: ApiCompetition,
    home_team: ApiTeam,
    away_team: ApiTeam,
    #[serde(default)]
    score: Option<ApiScore>,
}

#[derive(Debug, Deserialize)]
struct ApiCompetition {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ApiTeam {
    id: Option<u32>,
    name: Option<String>,
    crest: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiScore {
    winner: Option<String>,
    full_time: ApiGoals,
}

#[derive(Debug, Deserialize)]
struct ApiGoals {
    home: Option<u32>,
    away: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct StandingsResponse {
    #[serde(default)]
    standings: Vec<ApiStandingGroup>,
}

#[derive(Debug, Deserialize)]
struct ApiStandingGroup {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    table: Vec<ApiTableRow>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiTableRow {
    position: u32,
    team: ApiTeam,
    played_games: u32,
    won: u32,
    draw: u32,
    lost: u32,
    points: u32,
    goals_for: i32,
    goals_against: i32,
    goal_difference: i32,
    #[serde(default)]
    form: Option<String>,
}

fn team_name(team: &ApiTeam) -> String {
    team.name.clone().unwrap_or_else(|| "TBC".to_string())
}

fn venue_for(team_id: u32, m: &ApiMatch) -> Venue {
    if m.home_team.id == Some(team_id) {
        Venue::Home
    } else {
        Venue::Away
    }
}

fn to_fixture(team_id: u32, m: ApiMatch) -> Fixture {
    let venue = venue_for(team_id, &m);
    let opponent_id = match venue {
        Venue::Home => m.away_team.id,
        Venue::Away => m.home_team.id,
    };
    Fixture {
        id: m.id,
        venue,
        opponent_id,
        home_team: team_name(&m.home_team),
        away_team: team_name(&m.away_team),
        home_crest: m.home_team.crest,
        away_crest: m.away_team.crest,
        kickoff: m.utc_date,
        competition: m.competition.name,
    }
}

/// `None` when the match has no full-time score yet.
fn to_result(team_id: u32, m: ApiMatch) -> Option<MatchResult> {
    let venue = venue_for(team_id, &m);
    let score = m.score.as_ref()?;
    let (home_score, away_score) = (score.full_time.home?, score.full_time.away?);

    let outcome = match (score.winner.as_deref(), venue) {
        (Some("DRAW"), _) => Outcome::Draw,
        (Some("HOME_TEAM"), Venue::Home) | (Some("AWAY_TEAM"), Venue::Away) => Outcome::Win,
        (Some("HOME_TEAM"), Venue::Away) | (Some("AWAY_TEAM"), Venue::Home) => Outcome::Loss,
        _ => {
            let (ours, theirs) = match venue {
                Venue::Home => (home_score, away_score),
                Venue::Away => (away_score, home_score),
            };
            match ours.cmp(&theirs) {
                std::cmp::Ordering::Greater => Outcome::Win,
                std::cmp::Ordering::Equal => Outcome::Draw,
                std::cmp::Ordering::Less => Outcome::Loss,
            }
        }
    };

    Some(MatchResult {
        id: m.id,
        home_team: team_name(&m.home_team),
        away_team: team_name(&m.away_team),
        home_crest: m.home_team.crest.clone(),
        away_crest: m.away_team.crest.clone(),
        home_score,
        away_score,
        kickoff: m.utc_date,
        venue,
        outcome,
    })
}

pub struct FixturesClient {
    client: Client,
    config: FixturesConfig,
    api_key: Option<String>,
}

impl FixturesClient {
    pub fn new(
        config: FixturesConfig,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, FixturesError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            config,
            api_key,
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, FixturesError> {
        let api_key = self.api_key.as_deref().ok_or(FixturesError::MissingApiKey)?;
        let url = format!("{}{}", self.config.base_url.trim_end_matches('/'), path);

        let response = self
            .client
            .get(&url)
            .header("X-Auth-Token", api_key)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FixturesError::HttpStatus(status.as_u16()));
        }
        Ok(response.json::<T>().await?)
    }

    pub async fn try_upcoming_fixtures(&self) -> Result<Vec<Fixture>, FixturesError> {
        let path = format!("/teams/{}/matches?status=SCHEDULED&limit=5", self.config.team_id);
        let body: MatchesResponse = self.get_json(&path).await?;

        Ok(body
            .matches
            .into_iter()
            .take(self.config.fixture_limit)
            .map(|m| to_fixture(self.config.team_id, m))
            .collect())
    }

    pub async fn try_recent_results(&self) -> Result<Vec<MatchResult>, FixturesError> {
        let path = format!(
            "/teams/{}/matches?status=FINISHED&limit={}",
            self.config.team_id, self.config.result_limit
        );
        let body: MatchesResponse = self.get_json(&path).await?;

        let mut results: Vec<MatchResult> = body
            .matches
            .into_iter()
            .filter_map(|m| to_result(self.config.team_id, m))
            .collect();
        results.sort_by(|a, b| b.kickoff.cmp(&a.kickoff));
        results.truncate(self.config.result_limit);
        Ok(results)
    }

    pub async fn try_standings(&self) -> Result<Vec<Standing>, FixturesError> {
        let path = format!("/competitions/{}/standings", self.config.competition_id);
        let body: StandingsResponse = self.get_json(&path).await?;

        let Some(total) = body.standings.into_iter().find(|g| g.kind == "TOTAL") else {
            return Ok(Vec::new());
        };

        Ok(total
            .table
            .into_iter()
            .map(|row| Standing {
                position: row.position,
                highlighted: row.team.id == Some(self.config.team_id),
                team_id: row.team.id,
                team: team_name(&row.team),
                form: parse_form(row.form.as_deref()),
                crest: row.team.crest,
                played: row.played_games,
                won: row.won,
                draw: row.draw,
                lost: row.lost,
                goals_for: row.goals_for,
                goals_against: row.goals_against,
                goal_difference: row.goal_difference,
                points: row.points,
            })
            .collect())
    }

    pub async fn upcoming_fixtures(&self) -> Vec<Fixture> {
        or_empty("fixtures", self.try_upcoming_fixtures().await)
    }

    pub async fn recent_results(&self) -> Vec<MatchResult> {
        or_empty("results", self.try_recent_results().await)
    }

    pub async fn standings(&self) -> Vec<Standing> {
        or_empty("standings", self.try_standings().await)
    }
}

fn or_empty<T>(what: &str, result: Result<Vec<T>, FixturesError>) -> Vec<T> {
    match result {
        Ok(items) => items,
        Err(FixturesError::MissingApiKey) => {
            debug!("Skipping {}: no API key", what);
            Vec::new()
        }
        Err(e) => {
            error!("Failed to fetch {}: {}", what, e);
            Vec::new()
        }
    }
}

/// Match day as seen in the UK, e.g. "Sat 18 Oct".
pub fn format_fixture_date(kickoff: DateTime<Utc>) -> String {
    kickoff.with_timezone(&UK_TIME).format("%a %-d %b").to_string()
}

pub fn format_fixture_time(kickoff: DateTime<Utc>, zone: Tz) -> String {
    kickoff.with_timezone(&zone).format("%-I:%M %p").to_string()
}
