use crate::attendance::{date_key, parse_date, parse_range};
use crate::engine::Engine;
use crate::error::AttendanceResult;
use crate::model::{AttendanceRecord, AttendanceStatus, ClassInfo, MarkedBy};
use crate::slots::SLOT_COUNT;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// `present / total` as a whole percentage, 0 when there is nothing to divide.
/// Halves round to even.
pub fn attendance_rate(present: usize, total: usize) -> u32 {
    if total == 0 {
        return 0;
    }
    ((present as f64 / total as f64) * 100.0).round_ties_even() as u32
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Tally {
    total: usize,
    present: usize,
}

impl Tally {
    fn add(&mut self, r: &AttendanceRecord) {
        self.total += 1;
        if r.status == AttendanceStatus::Present {
            self.present += 1;
        }
    }

    fn rate(&self) -> u32 {
        attendance_rate(self.present, self.total)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotRate {
    pub slot_number: u8,
    pub total: usize,
    pub present: usize,
    pub rate: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DayRate {
    pub date: String,
    pub total: usize,
    pub present: usize,
    pub rate: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassAnalytics {
    pub class_id: i64,
    pub class_name: String,
    pub subject: String,
    pub enrolled_students: i64,
    pub total_records: usize,
    pub present_records: usize,
    pub attendance_rate: u32,
    pub slot_breakdown: Vec<SlotRate>,
    pub daily_breakdown: Vec<DayRate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassRank {
    pub class_id: i64,
    pub name: String,
    pub rate: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverallStats {
    pub total_classes: usize,
    pub total_students: i64,
    pub total_attendance_records: usize,
    pub overall_attendance_rate: u32,
    pub best_performing_class: Option<ClassRank>,
    pub worst_performing_class: Option<ClassRank>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassWiseReport {
    pub classes: Vec<ClassAnalytics>,
    pub overall_stats: OverallStats,
}

#[derive(Debug, Clone)]
pub struct ClassRoll {
    pub class: ClassInfo,
    pub enrolled_students: i64,
}

pub fn summarize_class(roll: &ClassRoll, records: &[AttendanceRecord]) -> ClassAnalytics {
    let mut all = Tally::default();
    let mut by_slot = [Tally::default(); SLOT_COUNT as usize];
    let mut by_day: BTreeMap<&str, Tally> = BTreeMap::new();

    for r in records.iter().filter(|r| r.class_id == roll.class.id) {
        all.add(r);
        if let Some(t) = (r.slot_number as usize)
            .checked_sub(1)
            .and_then(|i| by_slot.get_mut(i))
        {
            t.add(r);
        }
        by_day.entry(r.attendance_date.as_str()).or_default().add(r);
    }

    ClassAnalytics {
        class_id: roll.class.id,
        class_name: roll.class.name.clone(),
        subject: roll.class.subject.clone(),
        enrolled_students: roll.enrolled_students,
        total_records: all.total,
        present_records: all.present,
        attendance_rate: all.rate(),
        slot_breakdown: by_slot
            .iter()
            .enumerate()
            .map(|(i, t)| SlotRate {
                slot_number: i as u8 + 1,
                total: t.total,
                present: t.present,
                rate: t.rate(),
            })
            .collect(),
        daily_breakdown: by_day
            .into_iter()
            .map(|(date, t)| DayRate {
                date: date.to_string(),
                total: t.total,
                present: t.present,
                rate: t.rate(),
            })
            .collect(),
    }
}

/// Per-class rollups in the order given, plus the teacher-wide summary.
/// Best and worst keep the first class on a tie.
pub fn summarize(rolls: &[ClassRoll], records: &[AttendanceRecord]) -> ClassWiseReport {
    let classes: Vec<ClassAnalytics> = rolls
        .iter()
        .map(|roll| summarize_class(roll, records))
        .collect();

    let mut best: Option<&ClassAnalytics> = None;
    let mut worst: Option<&ClassAnalytics> = None;
    for c in &classes {
        if best.map_or(true, |b| c.attendance_rate > b.attendance_rate) {
            best = Some(c);
        }
        if worst.map_or(true, |w| c.attendance_rate < w.attendance_rate) {
            worst = Some(c);
        }
    }
    let rank = |c: &ClassAnalytics| ClassRank {
        class_id: c.class_id,
        name: c.class_name.clone(),
        rate: c.attendance_rate,
    };

    let total_present: usize = classes.iter().map(|c| c.present_records).sum();
    let total_records: usize = classes.iter().map(|c| c.total_records).sum();
    let overall_stats = OverallStats {
        total_classes: classes.len(),
        total_students: classes.iter().map(|c| c.enrolled_students).sum(),
        total_attendance_records: total_records,
        overall_attendance_rate: attendance_rate(total_present, total_records),
        best_performing_class: best.map(rank),
        worst_performing_class: worst.map(rank),
    };
    ClassWiseReport {
        classes,
        overall_stats,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkedStudent {
    pub student_id: String,
    pub student_name: String,
    pub status: AttendanceStatus,
    pub marked_by: MarkedBy,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotSummary {
    pub slot_number: u8,
    pub total_marked: usize,
    pub present: usize,
    pub absent: usize,
    pub attendance_rate: u32,
    pub students: Vec<MarkedStudent>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassSummary {
    pub class_id: i64,
    pub class_name: String,
    pub subject: String,
    pub enrolled_students: i64,
    pub slots: Vec<SlotSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryStats {
    pub total_classes: usize,
    pub total_enrolled_students: i64,
    pub total_marked_attendance: usize,
    pub total_present: usize,
    pub overall_attendance_rate: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceSummary {
    pub summary: Vec<ClassSummary>,
    pub stats: SummaryStats,
}

/// Who was marked in each slot of each class. Only slots with at least one
/// record are listed; `names` maps student ids to display names.
pub fn summarize_marks(
    rolls: &[ClassRoll],
    records: &[AttendanceRecord],
    names: &HashMap<String, String>,
) -> AttendanceSummary {
    let mut summary = Vec::with_capacity(rolls.len());
    for roll in rolls {
        let mut by_slot: BTreeMap<u8, SlotSummary> = BTreeMap::new();
        for r in records.iter().filter(|r| r.class_id == roll.class.id) {
            let slot = by_slot.entry(r.slot_number).or_insert_with(|| SlotSummary {
                slot_number: r.slot_number,
                total_marked: 0,
                present: 0,
                absent: 0,
                attendance_rate: 0,
                students: Vec::new(),
            });
            slot.total_marked += 1;
            match r.status {
                AttendanceStatus::Present => slot.present += 1,
                AttendanceStatus::Absent => slot.absent += 1,
            }
            slot.students.push(MarkedStudent {
                student_id: r.student_id.clone(),
                student_name: names
                    .get(&r.student_id)
                    .cloned()
                    .unwrap_or_else(|| "Unknown".to_string()),
                status: r.status,
                marked_by: r.marked_by,
                created_at: r.created_at.clone(),
            });
        }
        let slots = by_slot
            .into_values()
            .map(|mut s| {
                s.attendance_rate = attendance_rate(s.present, s.total_marked);
                s
            })
            .collect();
        summary.push(ClassSummary {
            class_id: roll.class.id,
            class_name: roll.class.name.clone(),
            subject: roll.class.subject.clone(),
            enrolled_students: roll.enrolled_students,
            slots,
        });
    }

    let slots = || summary.iter().flat_map(|c| c.slots.iter());
    let total_marked: usize = slots().map(|s| s.total_marked).sum();
    let total_present: usize = slots().map(|s| s.present).sum();
    let stats = SummaryStats {
        total_classes: summary.len(),
        total_enrolled_students: summary.iter().map(|c| c.enrolled_students).sum(),
        total_marked_attendance: total_marked,
        total_present,
        overall_attendance_rate: attendance_rate(total_present, total_marked),
    };
    AttendanceSummary { summary, stats }
}

impl Engine {
    pub fn class_wise_analytics(
        &self,
        teacher_id: &str,
        start_date: Option<&str>,
        end_date: Option<&str>,
    ) -> AttendanceResult<ClassWiseReport> {
        let (start, end) = parse_range(start_date, end_date)?;
        let teacher = self.require_user(teacher_id.trim(), "teacher")?;
        let classes = self.db().classes_for_teacher(&teacher.id)?;
        let mut rolls = Vec::with_capacity(classes.len());
        for class in classes {
            let enrolled_students = self.db().count_approved(class.id)?;
            rolls.push(ClassRoll {
                class,
                enrolled_students,
            });
        }
        let ids: Vec<i64> = rolls.iter().map(|r| r.class.id).collect();
        let start_key = start.map(date_key);
        let end_key = end.map(date_key);
        let records = self
            .db()
            .attendance_for_classes(&ids, start_key.as_deref(), end_key.as_deref())?;
        Ok(summarize(&rolls, &records))
    }

    /// Marks grouped by class and slot. A teacher narrows the scope to their
    /// classes, `class_id` to one class and `date` to one day; with no
    /// filters every class is included.
    pub fn attendance_summary(
        &self,
        teacher_id: Option<&str>,
        class_id: Option<i64>,
        date: Option<&str>,
    ) -> AttendanceResult<AttendanceSummary> {
        let date = date.map(parse_date).transpose()?.map(date_key);
        let scope = match teacher_id.map(str::trim).filter(|t| !t.is_empty()) {
            Some(t) => {
                let teacher = self.require_user(t, "teacher")?;
                let mut ids: Vec<i64> = self
                    .db()
                    .classes_for_teacher(&teacher.id)?
                    .iter()
                    .map(|c| c.id)
                    .collect();
                if let Some(id) = class_id {
                    ids.retain(|c| *c == id);
                }
                Some(ids)
            }
            None => class_id.map(|id| vec![id]),
        };
        let records = self
            .db()
            .attendance_matching(scope.as_deref(), date.as_deref())?;

        let class_ids: BTreeSet<i64> = records.iter().map(|r| r.class_id).collect();
        let mut rolls = Vec::with_capacity(class_ids.len());
        for id in class_ids {
            if let Some(class) = self.db().find_class(id)? {
                let enrolled_students = self.db().count_approved(id)?;
                rolls.push(ClassRoll {
                    class,
                    enrolled_students,
                });
            }
        }
        let mut names = HashMap::new();
        for r in &records {
            if names.contains_key(&r.student_id) {
                continue;
            }
            if let Some(user) = self.db().find_user(&r.student_id)? {
                names.insert(user.id, user.name);
            }
        }
        Ok(summarize_marks(&rolls, &records, &names))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn class(id: i64, name: &str) -> ClassRoll {
        ClassRoll {
            class: ClassInfo {
                id,
                name: name.into(),
                subject: "Science".into(),
                teacher_id: "t1".into(),
            },
            enrolled_students: 10,
        }
    }

    fn rec(class_id: i64, slot: u8, date: &str, status: AttendanceStatus) -> AttendanceRecord {
        AttendanceRecord {
            id: 0,
            student_id: "s".into(),
            class_id,
            slot_number: slot,
            day_of_week: 1,
            attendance_date: date.into(),
            status,
            marked_by: MarkedBy::Api,
            created_at: String::new(),
            updated_at: None,
        }
    }

    #[test]
    fn seven_of_ten_is_seventy() {
        assert_eq!(attendance_rate(7, 10), 70);
        assert_eq!(attendance_rate(0, 0), 0);
        assert_eq!(attendance_rate(2, 3), 67);
        assert_eq!(attendance_rate(1, 8), 12);
    }

    #[test]
    fn class_breakdowns_cover_every_slot_and_sort_days() {
        let mut records = Vec::new();
        for _ in 0..7 {
            records.push(rec(1, 2, "2025-01-07", AttendanceStatus::Present));
        }
        for _ in 0..3 {
            records.push(rec(1, 3, "2025-01-06", AttendanceStatus::Absent));
        }
        let c = summarize_class(&class(1, "Physics"), &records);
        assert_eq!(c.attendance_rate, 70);
        assert_eq!(c.slot_breakdown.len(), 9);
        assert_eq!(c.slot_breakdown[1].rate, 100);
        assert_eq!(c.slot_breakdown[2].rate, 0);
        assert_eq!(c.slot_breakdown[8].total, 0);
        let days: Vec<&str> = c.daily_breakdown.iter().map(|d| d.date.as_str()).collect();
        assert_eq!(days, vec!["2025-01-06", "2025-01-07"]);
    }

    #[test]
    fn empty_class_has_zero_rate() {
        let report = summarize(&[class(1, "Empty")], &[]);
        assert_eq!(report.classes[0].attendance_rate, 0);
        assert_eq!(report.overall_stats.overall_attendance_rate, 0);
    }

    #[test]
    fn best_and_worst_keep_first_on_ties() {
        let records = vec![
            rec(1, 1, "2025-01-06", AttendanceStatus::Present),
            rec(2, 1, "2025-01-06", AttendanceStatus::Present),
            rec(3, 1, "2025-01-06", AttendanceStatus::Absent),
            rec(4, 1, "2025-01-06", AttendanceStatus::Absent),
        ];
        let rolls = [class(1, "A"), class(2, "B"), class(3, "C"), class(4, "D")];
        let report = summarize(&rolls, &records);
        let o = &report.overall_stats;
        assert_eq!(o.best_performing_class.as_ref().map(|c| c.class_id), Some(1));
        assert_eq!(o.worst_performing_class.as_ref().map(|c| c.class_id), Some(3));
        assert_eq!(report.overall_stats.overall_attendance_rate, 50);
        assert_eq!(report.overall_stats.total_students, 40);
    }

    #[test]
    fn marks_group_by_class_and_slot() {
        let mut records = vec![
            rec(1, 3, "2025-01-06", AttendanceStatus::Present),
            rec(1, 3, "2025-01-06", AttendanceStatus::Absent),
            rec(1, 1, "2025-01-06", AttendanceStatus::Present),
            rec(2, 5, "2025-01-06", AttendanceStatus::Absent),
        ];
        records[0].student_id = "s1".into();
        let names = HashMap::from([("s1".to_string(), "Asha".to_string())]);
        let out = summarize_marks(&[class(1, "A"), class(2, "B")], &records, &names);

        assert_eq!(out.summary.len(), 2);
        let a = &out.summary[0];
        let slots: Vec<u8> = a.slots.iter().map(|s| s.slot_number).collect();
        assert_eq!(slots, vec![1, 3]);
        assert_eq!(a.slots[1].total_marked, 2);
        assert_eq!(a.slots[1].present, 1);
        assert_eq!(a.slots[1].absent, 1);
        assert_eq!(a.slots[1].attendance_rate, 50);
        assert_eq!(a.slots[1].students[0].student_name, "Asha");
        assert_eq!(a.slots[1].students[1].student_name, "Unknown");
        assert_eq!(out.summary[1].slots[0].attendance_rate, 0);

        assert_eq!(out.stats.total_classes, 2);
        assert_eq!(out.stats.total_enrolled_students, 20);
        assert_eq!(out.stats.total_marked_attendance, 4);
        assert_eq!(out.stats.total_present, 2);
        assert_eq!(out.stats.overall_attendance_rate, 50);
    }

    #[test]
    fn empty_marks_summary_is_all_zero() {
        let out = summarize_marks(&[], &[], &HashMap::new());
        assert!(out.summary.is_empty());
        assert_eq!(out.stats.overall_attendance_rate, 0);
        assert_eq!(out.stats.total_marked_attendance, 0);
    }

    #[test]
    fn no_classes_means_no_ranking() {
        let report = summarize(&[], &[]);
        assert!(report.classes.is_empty());
        assert_eq!(report.overall_stats.best_performing_class, None);
        assert_eq!(report.overall_stats.worst_performing_class, None);
    }
}
