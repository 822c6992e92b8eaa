use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Meal {
    Coffee,
    Breakfast,
    Lunch,
    Tea,
    Dinner,
}

impl Meal {
    pub const ALL: [Meal; 5] = [
        Meal::Coffee,
        Meal::Breakfast,
        Meal::Lunch,
        Meal::Tea,
        Meal::Dinner,
    ];

    pub fn key(self) -> &'static str {
        match self {
            Meal::Coffee => "coffee",
            Meal::Breakfast => "breakfast",
            Meal::Lunch => "lunch",
            Meal::Tea => "tea",
            Meal::Dinner => "dinner",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "coffee" => Some(Meal::Coffee),
            "breakfast" => Some(Meal::Breakfast),
            "lunch" => Some(Meal::Lunch),
            "tea" => Some(Meal::Tea),
            "dinner" => Some(Meal::Dinner),
            _ => None,
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Campus {
    #[default]
    DawaAcademy,
    Hifz,
    DaiyaStafs,
    Ayadi,
    OfficeStafs,
}

impl Campus {
    pub const ALL: [Campus; 5] = [
        Campus::DawaAcademy,
        Campus::Hifz,
        Campus::DaiyaStafs,
        Campus::Ayadi,
        Campus::OfficeStafs,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Campus::DawaAcademy => "dawa academy",
            Campus::Hifz => "hifz",
            Campus::DaiyaStafs => "daiya stafs",
            Campus::Ayadi => "ayadi",
            Campus::OfficeStafs => "office stafs",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let norm = s.trim().to_ascii_lowercase();
        Campus::ALL.into_iter().find(|c| c.name() == norm)
    }

    /// Staff campuses identify people by phone number and carry no class.
    pub fn is_staff(self) -> bool {
        matches!(self, Campus::DaiyaStafs | Campus::OfficeStafs)
    }
}

pub const CLASSES: [&str; 6] = ["8", "P1", "P2", "D1", "D2", "D3"];

pub fn parse_class(s: &str) -> Option<&'static str> {
    let t = s.trim();
    CLASSES
        .into_iter()
        .find(|c| c.eq_ignore_ascii_case(t))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    Student,
    Teacher,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Student => "student",
            Role::Teacher => "teacher",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Some(Role::Admin),
            "student" => Some(Role::Student),
            "teacher" => Some(Role::Teacher),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MealStatus {
    pub present: bool,
    pub sick: bool,
    pub sick_reason: Option<String>,
}

impl Default for MealStatus {
    fn default() -> Self {
        Self {
            present: true,
            sick: false,
            sick_reason: None,
        }
    }
}

impl MealStatus {
    /// Accepts both stored shapes: a bare boolean, or `{present, sick?, sickReason?}`.
    pub fn from_json(v: &Value) -> Result<Self, String> {
        if let Some(b) = v.as_bool() {
            return Ok(Self {
                present: b,
                ..Self::default()
            });
        }
        let Some(obj) = v.as_object() else {
            return Err("attendance entry must be boolean or object".to_string());
        };
        let present = match obj.get("present") {
            None | Some(Value::Null) => true,
            Some(p) => p
                .as_bool()
                .ok_or_else(|| "present must be boolean".to_string())?,
        };
        let sick = match obj.get("sick") {
            None | Some(Value::Null) => false,
            Some(s) => s
                .as_bool()
                .ok_or_else(|| "sick must be boolean".to_string())?,
        };
        let sick_reason = obj
            .get("sickReason")
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        Ok(Self {
            present,
            sick,
            sick_reason,
        })
    }

    pub fn to_json(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("present".into(), Value::Bool(self.present));
        obj.insert("sick".into(), Value::Bool(self.sick));
        if let Some(reason) = &self.sick_reason {
            obj.insert("sickReason".into(), Value::String(reason.clone()));
        }
        Value::Object(obj)
    }
}

/// Per-meal status for one admission number. Meals without a stored row are present.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Attendance {
    slots: [MealStatus; 5],
}

impl Attendance {
    pub fn all_present() -> Self {
        Self::default()
    }

    pub fn get(&self, meal: Meal) -> &MealStatus {
        &self.slots[meal.index()]
    }

    pub fn set(&mut self, meal: Meal, status: MealStatus) {
        self.slots[meal.index()] = status;
    }

    pub fn iter(&self) -> impl Iterator<Item = (Meal, &MealStatus)> {
        Meal::ALL.into_iter().map(move |m| (m, self.get(m)))
    }

    /// Every meal becomes present-and-sick; the reason is copied onto each meal.
    pub fn mark_sick(&mut self, reason: Option<&str>) {
        for slot in &mut self.slots {
            *slot = MealStatus {
                present: true,
                sick: true,
                sick_reason: reason.map(str::to_string),
            };
        }
    }

    pub fn clear_sick(&mut self) {
        for slot in &mut self.slots {
            slot.sick = false;
            slot.sick_reason = None;
        }
    }

    /// Applies an object keyed by meal name; unknown meals are rejected.
    pub fn apply_patch(&mut self, patch: &Value) -> Result<(), String> {
        let Some(obj) = patch.as_object() else {
            return Err("attendance must be an object keyed by meal".to_string());
        };
        for (k, v) in obj {
            let meal = Meal::parse(k).ok_or_else(|| format!("unknown meal: {}", k))?;
            let status = MealStatus::from_json(v).map_err(|e| format!("{}: {}", k, e))?;
            self.set(meal, status);
        }
        Ok(())
    }

    pub fn to_json(&self) -> Value {
        let mut obj = Map::new();
        for (meal, status) in self.iter() {
            obj.insert(meal.key().to_string(), status.to_json());
        }
        Value::Object(obj)
    }
}

/// Splits a full name into first name and the remainder.
pub fn split_full_name(full: &str) -> (String, String) {
    let t = full.trim();
    match t.split_once(char::is_whitespace) {
        Some((first, rest)) => (first.to_string(), rest.trim().to_string()),
        None => (t.to_string(), String::new()),
    }
}

pub fn join_name(first: &str, last: &str) -> String {
    let f = first.trim();
    let l = last.trim();
    if l.is_empty() {
        f.to_string()
    } else {
        format!("{} {}", f, l)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn meal_status_accepts_bool_and_object_shapes() {
        assert_eq!(
            MealStatus::from_json(&json!(false)).expect("bool"),
            MealStatus {
                present: false,
                sick: false,
                sick_reason: None
            }
        );
        let s = MealStatus::from_json(&json!({ "present": true, "sick": true, "sickReason": " fever " }))
            .expect("object");
        assert!(s.present && s.sick);
        assert_eq!(s.sick_reason.as_deref(), Some("fever"));
        assert!(MealStatus::from_json(&json!("yes")).is_err());
    }

    #[test]
    fn attendance_patch_rejects_unknown_meal() {
        let mut a = Attendance::all_present();
        a.apply_patch(&json!({ "lunch": false })).expect("patch");
        assert!(!a.get(Meal::Lunch).present);
        assert!(a.get(Meal::Dinner).present);
        let e = a.apply_patch(&json!({ "supper": true })).unwrap_err();
        assert!(e.contains("supper"));
    }

    #[test]
    fn sick_marks_every_meal_present_and_clearing_keeps_presence() {
        let mut a = Attendance::all_present();
        a.set(
            Meal::Tea,
            MealStatus {
                present: false,
                sick: false,
                sick_reason: None,
            },
        );
        a.mark_sick(Some("flu"));
        assert!(a
            .iter()
            .all(|(_, s)| s.present && s.sick && s.sick_reason.as_deref() == Some("flu")));
        a.clear_sick();
        assert!(a.iter().all(|(_, s)| s.present && !s.sick && s.sick_reason.is_none()));
    }

    #[test]
    fn campus_parse_is_case_insensitive_and_flags_staff() {
        assert_eq!(Campus::parse("Hifz"), Some(Campus::Hifz));
        assert!(Campus::parse("office stafs").expect("campus").is_staff());
        assert!(!Campus::DawaAcademy.is_staff());
        assert_eq!(Campus::parse("main"), None);
    }

    #[test]
    fn full_name_split_keeps_remainder() {
        assert_eq!(
            split_full_name("Amina  Bint Yusuf"),
            ("Amina".to_string(), "Bint Yusuf".to_string())
        );
        assert_eq!(split_full_name("Solo"), ("Solo".to_string(), String::new()));
        assert_eq!(join_name("A", ""), "A");
    }
}
