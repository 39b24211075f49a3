//! Page state and the display-ready cards the templates render.

use std::str::FromStr;

use chrono::{DateTime, Utc};

use crate::feeds::{filter_by_category, relative_time, Category, NewsItem};
use crate::fixtures::{
    format_fixture_date, format_fixture_time, Fixture, MatchResult, Outcome, Standing, TeamStats,
    Venue, PACIFIC_TIME, UK_TIME,
};

/// The tab a visitor is looking at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum View {
    #[default]
    News,
    Official,
    Social,
    Table,
    Stats,
}

impl View {
    pub const ALL: [View; 5] = [
        View::News,
        View::Official,
        View::Social,
        View::Table,
        View::Stats,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            View::News => "news",
            View::Official => "official",
            View::Social => "social",
            View::Table => "table",
            View::Stats => "stats",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            View::News => "News",
            View::Official => "Official",
            View::Social => "Social",
            View::Table => "Table",
            View::Stats => "Stats",
        }
    }

    pub fn empty_message(&self) -> &'static str {
        match self {
            View::News => "No news articles available right now.",
            View::Official => "No official content available right now.",
            View::Social => "No social posts available right now.",
            View::Table => "League table unavailable right now.",
            View::Stats => "Season stats unavailable right now.",
        }
    }

    /// Unknown or missing values land on the news tab.
    pub fn from_query(value: Option<&str>) -> Self {
        value.and_then(|v| v.parse().ok()).unwrap_or_default()
    }
}

impl FromStr for View {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        View::ALL
            .into_iter()
            .find(|v| v.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or(())
    }
}

#[derive(Debug, Clone)]
pub struct ItemCard {
    pub title: String,
    pub link: String,
    pub source: String,
    pub published_iso: String,
    pub age: String,
    pub description: Option<String>,
    pub thumbnail: Option<String>,
    pub is_social: bool,
}

impl ItemCard {
    pub fn new(item: &NewsItem, now: DateTime<Utc>) -> Self {
        let is_video = item.category == Category::Official && item.thumbnail.is_some();
        let is_social = item.category == Category::Social;

        Self {
            title: item.title.clone(),
            link: item.link.clone(),
            source: item.source.clone(),
            published_iso: item.published.to_rfc3339(),
            age: relative_time(item.published, now),
            description: if is_video || is_social {
                None
            } else {
                item.description.clone()
            },
            thumbnail: if is_video { item.thumbnail.clone() } else { None },
            is_social,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TabLink {
    pub href: String,
    pub label: &'static str,
    pub count: Option<usize>,
    pub active: bool,
}

pub fn tabs(active: View, items: &[NewsItem], standings: &[Standing]) -> Vec<TabLink> {
    View::ALL
        .into_iter()
        .map(|view| {
            let count = match view {
                View::News => Some(filter_by_category(items, Category::News).len()),
                View::Official => Some(filter_by_category(items, Category::Official).len()),
                View::Social => Some(filter_by_category(items, Category::Social).len()),
                View::Table => Some(standings.len()),
                View::Stats => None,
            };
            TabLink {
                href: format!("/?view={}", view.as_str()),
                label: view.label(),
                count,
                active: view == active,
            }
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct StatsCard {
    pub position: u32,
    pub played: u32,
    pub won: u32,
    pub drawn: u32,
    pub lost: u32,
    pub goals_for: i32,
    pub goals_against: i32,
    pub points: u32,
    pub points_per_game: String,
    pub form: Vec<&'static str>,
}

impl From<TeamStats> for StatsCard {
    fn from(stats: TeamStats) -> Self {
        Self {
            position: stats.position,
            played: stats.played,
            won: stats.won,
            drawn: stats.drawn,
            lost: stats.lost,
            goals_for: stats.goals_for,
            goals_against: stats.goals_against,
            points: stats.points,
            points_per_game: format!("{:.2}", stats.points_per_game),
            form: stats.form.iter().map(Outcome::letter).collect(),
        }
    }
}

/// What the active tab shows.
#[derive(Debug, Clone)]
pub enum Panel {
    Items(Vec<ItemCard>),
    Table(Vec<Standing>),
    Stats(Option<StatsCard>),
}

impl Panel {
    pub fn build(
        view: View,
        items: &[NewsItem],
        standings: &[Standing],
        results: &[MatchResult],
        now: DateTime<Utc>,
    ) -> Self {
        let cards = |category| -> Vec<ItemCard> {
            filter_by_category(items, category)
                .iter()
                .map(|item| ItemCard::new(item, now))
                .collect()
        };

        match view {
            View::News => Panel::Items(cards(Category::News)),
            View::Official => Panel::Items(cards(Category::Official)),
            View::Social => Panel::Items(cards(Category::Social)),
            View::Table => Panel::Table(standings.to_vec()),
            View::Stats => Panel::Stats(TeamStats::derive(standings, results).map(StatsCard::from)),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Panel::Items(items) => items.is_empty(),
            Panel::Table(rows) => rows.is_empty(),
            Panel::Stats(stats) => stats.is_none(),
        }
    }
}

/// "1st", "2nd", "3rd", "11th", "22nd".
pub fn ordinal(n: u32) -> String {
    let suffix = match (n % 100, n % 10) {
        (11..=13, _) => "th",
        (_, 1) => "st",
        (_, 2) => "nd",
        (_, 3) => "rd",
        _ => "th",
    };
    format!("{}{}", n, suffix)
}

/// Familiar short name for a club, falling back to the name without its
/// "FC"/"AFC" suffix.
pub fn short_team_name(name: &str) -> String {
    let short = match name {
        "Portsmouth FC" => "Pompey",
        "Sheffield United FC" => "Sheff Utd",
        "Sheffield Wednesday FC" => "Sheff Wed",
        "West Bromwich Albion FC" => "West Brom",
        "Queens Park Rangers FC" => "QPR",
        "Wolverhampton Wanderers FC" => "Wolves",
        "Nottingham Forest FC" => "Nott'm Forest",
        "Birmingham City FC" => "Birmingham",
        "Middlesbrough FC" => "Middlesbrough",
        "Sunderland AFC" => "Sunderland",
        "Leeds United FC" => "Leeds",
        "Norwich City FC" => "Norwich",
        "Coventry City FC" => "Coventry",
        "Bristol City FC" => "Bristol City",
        "Stoke City FC" => "Stoke",
        "Hull City FC" => "Hull",
        "Watford FC" => "Watford",
        "Millwall FC" => "Millwall",
        "Blackburn Rovers FC" => "Blackburn",
        "Preston North End FC" => "Preston",
        "Swansea City AFC" => "Swansea",
        "Cardiff City FC" => "Cardiff",
        "Plymouth Argyle FC" => "Plymouth",
        "Oxford United FC" => "Oxford",
        "Derby County FC" => "Derby",
        "Luton Town FC" => "Luton",
        "Burnley FC" => "Burnley",
        "Charlton Athletic FC" => "Charlton",
        "Southampton FC" => "Southampton",
        "Ipswich Town FC" => "Ipswich",
        other => return other.replacen(" FC", "", 1).replacen(" AFC", "", 1),
    };
    short.to_string()
}

fn outcome_class(outcome: Outcome) -> &'static str {
    match outcome {
        Outcome::Win => "win",
        Outcome::Draw => "draw",
        Outcome::Loss => "loss",
    }
}

#[derive(Debug, Clone)]
pub struct FixtureCard {
    pub date: String,
    pub home: String,
    pub away: String,
    pub home_crest: Option<String>,
    pub away_crest: Option<String>,
    pub is_home: bool,
    /// First word of the opponent's full name, e.g. "Luton"
    pub opponent_label: String,
    pub opponent_position: Option<String>,
    /// CSS classes for up to five form dots, most recent first
    pub opponent_form: Vec<&'static str>,
    pub uk_time: String,
    pub pacific_time: String,
    pub competition: String,
}

impl FixtureCard {
    /// Opponent position and form come from the league table when the
    /// opponent is in it.
    pub fn new(fixture: &Fixture, standings: &[Standing]) -> Self {
        let is_home = fixture.venue == Venue::Home;
        let opponent = if is_home {
            &fixture.away_team
        } else {
            &fixture.home_team
        };
        let row = fixture
            .opponent_id
            .and_then(|id| standings.iter().find(|s| s.team_id == Some(id)));

        Self {
            date: format_fixture_date(fixture.kickoff),
            home: short_team_name(&fixture.home_team),
            away: short_team_name(&fixture.away_team),
            home_crest: fixture.home_crest.clone(),
            away_crest: fixture.away_crest.clone(),
            is_home,
            opponent_label: opponent.split(' ').next().unwrap_or_default().to_string(),
            opponent_position: row.map(|r| ordinal(r.position)),
            opponent_form: row
                .map(|r| r.form.iter().take(5).copied().map(outcome_class).collect())
                .unwrap_or_default(),
            uk_time: format_fixture_time(fixture.kickoff, UK_TIME),
            pacific_time: format_fixture_time(fixture.kickoff, PACIFIC_TIME),
            competition: fixture.competition.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResultBadge {
    pub letter: &'static str,
    pub class: &'static str,
    pub score: String,
    pub crest: Option<String>,
}

/// Recent form, oldest on the left so the latest result sits nearest the
/// upcoming fixtures.
pub fn result_badges(results: &[MatchResult]) -> Vec<ResultBadge> {
    results
        .iter()
        .take(5)
        .rev()
        .map(|r| ResultBadge {
            letter: r.outcome.letter(),
            class: outcome_class(r.outcome),
            score: format!("{}-{}", r.home_score, r.away_score),
            crest: r.opponent_crest().map(str::to_string),
        })
        .collect()
}
