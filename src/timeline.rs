//! Read-time reconstruction of an item's stage timeline.
//!
//! A pure derivation over the item row plus its audit history: no locking,
//! no writes, safe to compute for many items in parallel when rendering a
//! dashboard. The output is a gap-free, non-overlapping sequence of
//! segments whose union exactly spans `[start_date, effective_end]`.
//! Degenerate segments from malformed historical data are dropped and
//! logged, never fatal — a partial timeline beats a failed read.
//!
//! Color and name attribution for historical stage references (old audit
//! rows may point at definitions that have since changed) runs through an
//! ordered list of resolvers; the first that produces a display wins.
//! This is purely a presentation concern layered on top of the
//! reconstruction, kept apart from the state-machine logic.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::audit::AuditEntry;
use crate::catalog::{Stage, StageCatalog};
use crate::engine::{Item, ItemStatus};

/// Derived display interval attributing an item's occupancy to one stage.
/// Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineSegment {
    /// Stage id when the reference resolved against the catalog.
    pub stage_id: Option<String>,
    pub stage_name: String,
    pub color: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub duration_hours: f64,
    pub is_current: bool,
}

/// Reconstruct display segments as of now.
pub fn segments(item: &Item, history: &[AuditEntry], catalog: &StageCatalog) -> Vec<TimelineSegment> {
    segments_at(item, history, catalog, Utc::now())
}

/// Reconstruct display segments as of an explicit instant.
///
/// 1. Empty history: one segment spanning the whole item, attributed to
///    the current stage (or the status/neutral fallbacks).
/// 2. A non-null `from_stage` on the first entry yields a leading segment
///    from `start_date` to that entry.
/// 3. Each consecutive entry pair yields a segment attributed to the
///    earlier entry's `to_stage`.
/// 4. The last entry's `to_stage` runs to `effective_end`.
/// 5. Any segment whose start exceeds its end is an anomaly: logged,
///    dropped, reconstruction continues.
pub fn segments_at(
    item: &Item,
    history: &[AuditEntry],
    catalog: &StageCatalog,
    now: DateTime<Utc>,
) -> Vec<TimelineSegment> {
    let start = day_start(item.start_date);
    let end = effective_end(item, history, now);

    let mut raw: Vec<(Option<String>, DateTime<Utc>, DateTime<Utc>, bool)> = Vec::new();

    if history.is_empty() {
        raw.push((Some(item.current_stage_id.clone()), start, end, true));
    } else {
        let mut entries = history.to_vec();
        entries.sort_by_key(|e| e.created_at);

        if let Some(from) = &entries[0].from_stage {
            raw.push((Some(from.clone()), start, entries[0].created_at, false));
        }
        for pair in entries.windows(2) {
            raw.push((
                pair[0].to_stage.clone(),
                pair[0].created_at,
                pair[1].created_at,
                false,
            ));
        }
        let last = &entries[entries.len() - 1];
        raw.push((last.to_stage.clone(), last.created_at, end, true));
    }

    raw.into_iter()
        .filter_map(|(stage_ref, seg_start, seg_end, is_current)| {
            if seg_start > seg_end {
                tracing::warn!(
                    item = %item.id,
                    stage = stage_ref.as_deref().unwrap_or("<none>"),
                    %seg_start,
                    %seg_end,
                    "dropping degenerate timeline segment"
                );
                return None;
            }
            let display = resolve_display(stage_ref.as_deref(), is_current, item, catalog);
            Some(TimelineSegment {
                stage_id: display.stage_id,
                stage_name: display.name,
                color: display.color,
                start: seg_start,
                end: seg_end,
                duration_hours: (seg_end - seg_start).num_seconds() as f64 / 3600.0,
                is_current,
            })
        })
        .collect()
}

/// Where the timeline stops: the real `end_date` for items in a terminal
/// status; otherwise today, clipped by `end_date` when one is set. A
/// terminal item with no `end_date` falls back to its last transition.
pub fn effective_end(item: &Item, history: &[AuditEntry], now: DateTime<Utc>) -> DateTime<Utc> {
    if item.status.is_terminal() {
        item.end_date.map(day_start).unwrap_or_else(|| {
            history
                .iter()
                .map(|e| e.created_at)
                .max()
                .unwrap_or(now)
        })
    } else {
        match item.end_date {
            Some(end) => now.min(day_start(end)),
            None => now,
        }
    }
}

/// Walked-through share of the item's schedule, for dashboard bars.
///
/// 0 before the start date; 100 only when explicitly completed; 0 when
/// cancelled; otherwise linear elapsed/total clamped to [5, 95] so an
/// in-flight item never reads as untouched or finished.
pub fn progress_percentage(item: &Item, now: DateTime<Utc>) -> f64 {
    let start = day_start(item.start_date);
    if now < start {
        return 0.0;
    }
    match item.status {
        ItemStatus::Completed => return 100.0,
        ItemStatus::Cancelled => return 0.0,
        ItemStatus::Planning | ItemStatus::Active => {}
    }
    let Some(end_date) = item.end_date else {
        // Schedule is open-ended: started but with nothing to interpolate
        // against, report the floor.
        return 5.0;
    };
    let end = day_start(end_date);
    if end <= start {
        return 95.0;
    }
    let total = (end - start).num_seconds() as f64;
    let elapsed = (now - start).num_seconds() as f64;
    (elapsed / total * 100.0).clamp(5.0, 95.0)
}

fn day_start(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

// ---------------------------------------------------------------------------
// Stage display attribution
// ---------------------------------------------------------------------------

struct StageDisplay {
    stage_id: Option<String>,
    name: String,
    color: String,
}

struct AttributionCx<'a> {
    reference: Option<&'a str>,
    is_current: bool,
    item: &'a Item,
    catalog: &'a StageCatalog,
}

type Attributor = fn(&AttributionCx<'_>) -> Option<StageDisplay>;

/// Tried in order; first success wins.
const ATTRIBUTORS: &[Attributor] = &[
    live_current_stage,
    catalog_by_id,
    catalog_by_name,
    status_derived,
    neutral_default,
];

fn resolve_display(
    reference: Option<&str>,
    is_current: bool,
    item: &Item,
    catalog: &StageCatalog,
) -> StageDisplay {
    let cx = AttributionCx {
        reference,
        is_current,
        item,
        catalog,
    };
    ATTRIBUTORS
        .iter()
        .find_map(|resolve| resolve(&cx))
        .unwrap_or_else(|| StageDisplay {
            stage_id: None,
            name: "Unknown stage".to_string(),
            color: NEUTRAL_COLOR.to_string(),
        })
}

fn display_of(stage: &Stage) -> StageDisplay {
    StageDisplay {
        stage_id: Some(stage.id.clone()),
        name: stage.name.clone(),
        color: stage.color.clone(),
    }
}

/// The item's live current stage, only for the segment that *is* current.
fn live_current_stage(cx: &AttributionCx<'_>) -> Option<StageDisplay> {
    if !cx.is_current {
        return None;
    }
    cx.catalog.by_id(&cx.item.current_stage_id).map(display_of)
}

fn catalog_by_id(cx: &AttributionCx<'_>) -> Option<StageDisplay> {
    cx.reference
        .and_then(|r| cx.catalog.by_id(r))
        .map(display_of)
}

/// Older audit rows may carry a reference that only survives as a name.
fn catalog_by_name(cx: &AttributionCx<'_>) -> Option<StageDisplay> {
    cx.reference
        .and_then(|r| cx.catalog.by_name(r))
        .map(display_of)
}

fn status_derived(cx: &AttributionCx<'_>) -> Option<StageDisplay> {
    let (name, color) = match cx.item.status {
        ItemStatus::Planning => ("Planning", "#A78BFA"),
        ItemStatus::Active => ("Active", "#60A5FA"),
        ItemStatus::Completed => ("Completed", "#34D399"),
        ItemStatus::Cancelled => ("Cancelled", "#F87171"),
    };
    Some(StageDisplay {
        stage_id: None,
        name: name.to_string(),
        color: color.to_string(),
    })
}

const NEUTRAL_COLOR: &str = "#D1D5DB";

fn neutral_default(_cx: &AttributionCx<'_>) -> Option<StageDisplay> {
    Some(StageDisplay {
        stage_id: None,
        name: "Unknown stage".to_string(),
        color: NEUTRAL_COLOR.to_string(),
    })
}
