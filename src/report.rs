//! Attendance aggregation. Everything here is pure; handlers load rows and hand them in.
use crate::model::{Attendance, Campus, Meal};
use serde::Serialize;
use std::collections::BTreeMap;

const DEFAULT_SICK_REASON: &str = "Marked as sick";

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StudentInfo {
    pub id: String,
    pub name: String,
    pub class: Option<String>,
    pub admission_number: String,
    pub campus: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sick_reason: Option<String>,
}

/// One person as seen by the aggregator: identity, sick flag from the account, meal rows.
#[derive(Debug, Clone)]
pub struct RosterEntry {
    pub info: StudentInfo,
    pub is_sick: bool,
    pub sick_reason: Option<String>,
    pub attendance: Attendance,
}

impl RosterEntry {
    /// The account's reason wins, then the meal row's own reason, then the default.
    fn sick_info(&self, meal_reason: Option<&str>) -> StudentInfo {
        let mut info = self.info.clone();
        info.sick_reason = Some(
            self.sick_reason
                .clone()
                .or_else(|| meal_reason.map(str::to_string))
                .unwrap_or_else(|| DEFAULT_SICK_REASON.to_string()),
        );
        info
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MealSummary {
    pub present: u32,
    pub absent: u32,
    pub sick: u32,
    pub present_students: Vec<StudentInfo>,
    pub absent_students: Vec<StudentInfo>,
    pub sick_students: Vec<StudentInfo>,
    pub campus_totals: BTreeMap<String, u32>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceSummary {
    pub coffee: MealSummary,
    pub breakfast: MealSummary,
    pub lunch: MealSummary,
    pub tea: MealSummary,
    pub dinner: MealSummary,
    pub total_sick: u32,
    pub sick_students: Vec<StudentInfo>,
}

impl AttendanceSummary {
    pub fn meal(&self, meal: Meal) -> &MealSummary {
        match meal {
            Meal::Coffee => &self.coffee,
            Meal::Breakfast => &self.breakfast,
            Meal::Lunch => &self.lunch,
            Meal::Tea => &self.tea,
            Meal::Dinner => &self.dinner,
        }
    }

    fn meal_mut(&mut self, meal: Meal) -> &mut MealSummary {
        match meal {
            Meal::Coffee => &mut self.coffee,
            Meal::Breakfast => &mut self.breakfast,
            Meal::Lunch => &mut self.lunch,
            Meal::Tea => &mut self.tea,
            Meal::Dinner => &mut self.dinner,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MealCounts {
    pub coffee: u32,
    pub breakfast: u32,
    pub lunch: u32,
    pub tea: u32,
    pub dinner: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Overview {
    pub attendance_summary: AttendanceSummary,
    pub grand_totals: MealCounts,
    pub total_sick: u32,
    pub sick_students: Vec<StudentInfo>,
}

enum Bucket {
    Present,
    Absent,
    Sick,
}

fn classify(entry: &RosterEntry, meal: Meal) -> Bucket {
    let status = entry.attendance.get(meal);
    if entry.is_sick || status.sick {
        Bucket::Sick
    } else if status.present {
        Bucket::Present
    } else {
        Bucket::Absent
    }
}

fn tally(summary: &mut MealSummary, entry: &RosterEntry, meal: Meal, campus: &str) {
    match classify(entry, meal) {
        Bucket::Sick => {
            let reason = entry.attendance.get(meal).sick_reason.as_deref();
            summary.sick += 1;
            summary.sick_students.push(entry.sick_info(reason));
        }
        Bucket::Present => {
            summary.present += 1;
            summary.present_students.push(entry.info.clone());
            *summary.campus_totals.entry(campus.to_string()).or_insert(0) += 1;
        }
        Bucket::Absent => {
            summary.absent += 1;
            summary.absent_students.push(entry.info.clone());
        }
    }
}

/// Roster report: every campus appears in `campusTotals`, a missing campus counts as
/// `dawa academy`, and a sick person is counted only as sick for that meal.
pub fn summarize_roster(entries: &[RosterEntry]) -> AttendanceSummary {
    let mut summary = AttendanceSummary::default();
    for meal in Meal::ALL {
        let m = summary.meal_mut(meal);
        for c in Campus::ALL {
            m.campus_totals.insert(c.name().to_string(), 0);
        }
    }

    for entry in entries {
        let campus = entry
            .info
            .campus
            .as_deref()
            .map(|c| c.trim().to_ascii_lowercase())
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| Campus::default().name().to_string());
        for meal in Meal::ALL {
            tally(summary.meal_mut(meal), entry, meal, &campus);
        }
        if entry.is_sick {
            summary.total_sick += 1;
            summary.sick_students.push(entry.sick_info(None));
        }
    }
    summary
}

/// Account overview: campuses appear as they are found, entries without a campus are skipped.
pub fn summarize_accounts(entries: &[RosterEntry]) -> Overview {
    let mut summary = AttendanceSummary::default();
    for entry in entries {
        let Some(campus) = entry
            .info
            .campus
            .as_deref()
            .map(|c| c.trim().to_ascii_lowercase())
            .filter(|c| !c.is_empty())
        else {
            continue;
        };
        for meal in Meal::ALL {
            let m = summary.meal_mut(meal);
            m.campus_totals.entry(campus.clone()).or_insert(0);
            tally(m, entry, meal, &campus);
        }
        if entry.is_sick {
            summary.total_sick += 1;
            summary.sick_students.push(entry.sick_info(None));
        }
    }

    let grand_totals = MealCounts {
        coffee: summary.coffee.present,
        breakfast: summary.breakfast.present,
        lunch: summary.lunch.present,
        tea: summary.tea.present,
        dinner: summary.dinner.present,
    };
    Overview {
        total_sick: summary.total_sick,
        sick_students: summary.sick_students.clone(),
        grand_totals,
        attendance_summary: summary,
    }
}
