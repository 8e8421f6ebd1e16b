//! Analytics - read-only reports over the reconciled todo history.
//!
//! All reports are pure functions of a todo slice (and `now` where a time
//! window is involved). Hours are UTC.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Timelike, Utc};
use serde::Serialize;

use crate::todo::{Todo, TodoId, TodoStatus};

/// Width of the completion-rate lookback window.
const COMPLETION_WINDOW_DAYS: i64 = 90;
const LONG_DURATION_MAX_DAYS: f64 = 3650.0;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StatusCount {
    pub status: TodoStatus,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct WeeklyCompletion {
    pub week_start: String,
    pub week_end: String,
    pub total_tasks: usize,
    pub completed_tasks: usize,
    pub completion_rate: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CompletionStats {
    pub status_distribution: Vec<StatusCount>,
    pub weekly_completion: Vec<WeeklyCompletion>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct HourCount {
    pub hour: u32,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CompletionTime {
    pub id: TodoId,
    pub title: String,
    pub completion_time_hours: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProductivityPatterns {
    pub creation_hour_distribution: Vec<HourCount>,
    pub avg_completion_time_hours: f64,
    pub completion_time_data: Vec<CompletionTime>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PlannedDuration {
    pub id: TodoId,
    pub title: String,
    pub planned_duration_days: f64,
    pub status: TodoStatus,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DurationRange {
    pub min: f64,
    pub max: f64,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DurationRanges {
    pub short: DurationRange,
    pub medium: DurationRange,
    pub long: DurationRange,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DurationAnalysis {
    pub duration_data: Vec<PlannedDuration>,
    pub duration_ranges: DurationRanges,
}

/// Status counts plus weekly completion rates over the last 90 days.
///
/// Weeks are 7-day windows starting at `now - 90 days`; a window is emitted
/// while its start is not after `now`. Tasks are bucketed by creation time.
pub fn completion_stats(todos: &[Todo], now: DateTime<Utc>) -> CompletionStats {
    let mut counts: BTreeMap<TodoStatus, usize> = BTreeMap::new();
    for todo in todos {
        *counts.entry(todo.status).or_default() += 1;
    }
    let status_distribution = counts
        .into_iter()
        .map(|(status, count)| StatusCount { status, count })
        .collect();

    let mut weekly_completion = Vec::new();
    let mut week_start = now - Duration::days(COMPLETION_WINDOW_DAYS);
    while week_start <= now {
        let week_end = week_start + Duration::days(7);
        let in_week = todos
            .iter()
            .filter(|t| t.created_at >= week_start && t.created_at < week_end);
        let (total, completed) = in_week.fold((0usize, 0usize), |(total, done), t| {
            (total + 1, done + usize::from(t.status == TodoStatus::Success))
        });
        let rate = if total > 0 {
            completed as f64 / total as f64 * 100.0
        } else {
            0.0
        };

        weekly_completion.push(WeeklyCompletion {
            week_start: week_start.format("%Y-%m-%d").to_string(),
            week_end: week_end.format("%Y-%m-%d").to_string(),
            total_tasks: total,
            completed_tasks: completed,
            completion_rate: round2(rate),
        });
        week_start = week_end;
    }

    CompletionStats {
        status_distribution,
        weekly_completion,
    }
}

/// Creation-hour histogram and completion times of successful todos.
pub fn productivity_patterns(todos: &[Todo]) -> ProductivityPatterns {
    let mut hours = [0usize; 24];
    for todo in todos {
        hours[todo.created_at.hour() as usize] += 1;
    }
    let creation_hour_distribution = hours
        .iter()
        .enumerate()
        .filter(|(_, count)| **count > 0)
        .map(|(hour, count)| HourCount {
            hour: hour as u32,
            count: *count,
        })
        .collect();

    let completion_time_data: Vec<CompletionTime> = todos
        .iter()
        .filter(|t| t.status == TodoStatus::Success)
        .map(|t| CompletionTime {
            id: t.id,
            title: t.title.clone(),
            completion_time_hours: round2(hours_between(t.created_at, t.updated_at)),
        })
        .collect();

    let avg_completion_time_hours = if completion_time_data.is_empty() {
        0.0
    } else {
        let sum: f64 = completion_time_data
            .iter()
            .map(|c| c.completion_time_hours)
            .sum();
        round2(sum / completion_time_data.len() as f64)
    };

    ProductivityPatterns {
        creation_hour_distribution,
        avg_completion_time_hours,
        completion_time_data,
    }
}

/// Planned duration (creation to deadline) per todo, bucketed short/medium/long.
pub fn duration_analysis(todos: &[Todo]) -> DurationAnalysis {
    let mut ranges = DurationRanges {
        short: DurationRange {
            min: 0.0,
            max: 1.0,
            count: 0,
        },
        medium: DurationRange {
            min: 1.0,
            max: 7.0,
            count: 0,
        },
        long: DurationRange {
            min: 7.0,
            max: LONG_DURATION_MAX_DAYS,
            count: 0,
        },
    };

    let duration_data: Vec<PlannedDuration> = todos
        .iter()
        .map(|t| PlannedDuration {
            id: t.id,
            title: t.title.clone(),
            planned_duration_days: round2(hours_between(t.created_at, t.deadline) / 24.0),
            status: t.status,
        })
        .collect();

    for item in &duration_data {
        let days = item.planned_duration_days;
        if days <= ranges.short.max {
            ranges.short.count += 1;
        } else if days <= ranges.medium.max {
            ranges.medium.count += 1;
        } else {
            ranges.long.count += 1;
        }
    }

    DurationAnalysis {
        duration_data,
        duration_ranges: ranges,
    }
}

fn hours_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds() as f64 / 3_600_000.0
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
