//! Schedule Entry Lock CC codec.
//!
//! Binary codec for weekday schedule slots on entry locks. Optional
//! schedule fields use `0xFF` as the absence marker on the wire; an
//! erase command fills every schedule byte with `0xFF`.

use super::{CommandClasses, CommandRaw, PayloadError};

/// Absence marker for optional schedule fields.
const ABSENT: u8 = 0xFF;

/// Schedule Entry Lock command identifiers (within class 0x4E).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ScheduleEntryLockCommand {
    EnableSet = 0x01,
    EnableAllSet = 0x02,
    WeekDayScheduleSet = 0x03,
    WeekDayScheduleGet = 0x04,
    WeekDayScheduleReport = 0x05,
    SupportedGet = 0x09,
    SupportedReport = 0x0A,
}

impl ScheduleEntryLockCommand {
    /// Try to convert from a byte.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(ScheduleEntryLockCommand::EnableSet),
            0x02 => Some(ScheduleEntryLockCommand::EnableAllSet),
            0x03 => Some(ScheduleEntryLockCommand::WeekDayScheduleSet),
            0x04 => Some(ScheduleEntryLockCommand::WeekDayScheduleGet),
            0x05 => Some(ScheduleEntryLockCommand::WeekDayScheduleReport),
            0x09 => Some(ScheduleEntryLockCommand::SupportedGet),
            0x0A => Some(ScheduleEntryLockCommand::SupportedReport),
            _ => None,
        }
    }

    /// Convert to a byte.
    pub fn to_byte(self) -> u8 {
        self as u8
    }
}

fn raw(command: ScheduleEntryLockCommand, payload: Vec<u8>) -> CommandRaw {
    CommandRaw::new(
        CommandClasses::ScheduleEntryLock.to_byte(),
        command.to_byte(),
        payload,
    )
}

// ============================================================================
// Enable Commands
// ============================================================================

/// Enable or disable schedules for one user.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EnableSet {
    pub user_id: u8,
    pub enabled: bool,
}

impl EnableSet {
    pub fn parse(payload: &[u8]) -> Result<Self, PayloadError> {
        if payload.len() < 2 {
            return Err(PayloadError::PayloadTooShort {
                expected: 2,
                got: payload.len(),
            });
        }
        if payload[1] > 1 {
            return Err(PayloadError::InvalidField {
                field: "enabled",
                value: payload[1],
            });
        }
        Ok(Self {
            user_id: payload[0],
            enabled: payload[1] == 1,
        })
    }

    pub fn to_raw(&self) -> CommandRaw {
        raw(
            ScheduleEntryLockCommand::EnableSet,
            vec![self.user_id, u8::from(self.enabled)],
        )
    }
}

/// Enable or disable schedules for all users.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EnableAllSet {
    pub enabled: bool,
}

impl EnableAllSet {
    pub fn parse(payload: &[u8]) -> Result<Self, PayloadError> {
        let byte = *payload.first().ok_or(PayloadError::PayloadTooShort {
            expected: 1,
            got: 0,
        })?;
        if byte > 1 {
            return Err(PayloadError::InvalidField {
                field: "enabled",
                value: byte,
            });
        }
        Ok(Self { enabled: byte == 1 })
    }

    pub fn to_raw(&self) -> CommandRaw {
        raw(
            ScheduleEntryLockCommand::EnableAllSet,
            vec![u8::from(self.enabled)],
        )
    }
}

// ============================================================================
// Supported Report
// ============================================================================

/// Ask how many schedule slots the lock offers. Empty payload.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SupportedGet;

impl SupportedGet {
    pub fn parse(_payload: &[u8]) -> Result<Self, PayloadError> {
        Ok(Self)
    }

    pub fn to_raw(&self) -> CommandRaw {
        raw(ScheduleEntryLockCommand::SupportedGet, Vec::new())
    }
}

/// Slot capacities of the lock. The daily-repeating count only exists
/// from version 3 on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SupportedReport {
    pub num_week_day_slots: u8,
    pub num_year_day_slots: u8,
    pub num_daily_repeating_slots: Option<u8>,
}

impl SupportedReport {
    pub fn parse(payload: &[u8]) -> Result<Self, PayloadError> {
        if payload.len() < 2 {
            return Err(PayloadError::PayloadTooShort {
                expected: 2,
                got: payload.len(),
            });
        }
        Ok(Self {
            num_week_day_slots: payload[0],
            num_year_day_slots: payload[1],
            num_daily_repeating_slots: payload.get(2).copied(),
        })
    }

    pub fn to_raw(&self) -> CommandRaw {
        let mut payload = vec![self.num_week_day_slots, self.num_year_day_slots];
        if let Some(slots) = self.num_daily_repeating_slots {
            payload.push(slots);
        }
        raw(ScheduleEntryLockCommand::SupportedReport, payload)
    }
}

// ============================================================================
// Weekday Schedules
// ============================================================================

/// One weekday schedule window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WeekDaySchedule {
    /// 0 = Sunday … 6 = Saturday.
    pub weekday: u8,
    pub start_hour: u8,
    pub start_minute: u8,
    pub stop_hour: u8,
    pub stop_minute: u8,
}

/// Set or erase one weekday schedule slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WeekDayScheduleSet {
    pub user_id: u8,
    pub slot_id: u8,
    /// `Some` sets the slot, `None` erases it.
    pub schedule: Option<WeekDaySchedule>,
}

impl WeekDayScheduleSet {
    pub fn parse(payload: &[u8]) -> Result<Self, PayloadError> {
        if payload.len() < 3 {
            return Err(PayloadError::PayloadTooShort {
                expected: 3,
                got: payload.len(),
            });
        }
        let action = payload[0];
        let user_id = payload[1];
        let slot_id = payload[2];

        let schedule = match action {
            0 => None,
            1 => {
                if payload.len() < 8 {
                    return Err(PayloadError::PayloadTooShort {
                        expected: 8,
                        got: payload.len(),
                    });
                }
                Some(WeekDaySchedule {
                    weekday: payload[3],
                    start_hour: payload[4],
                    start_minute: payload[5],
                    stop_hour: payload[6],
                    stop_minute: payload[7],
                })
            }
            other => {
                return Err(PayloadError::InvalidField {
                    field: "action",
                    value: other,
                })
            }
        };

        Ok(Self {
            user_id,
            slot_id,
            schedule,
        })
    }

    pub fn to_raw(&self) -> CommandRaw {
        let mut payload = vec![
            u8::from(self.schedule.is_some()),
            self.user_id,
            self.slot_id,
        ];
        match &self.schedule {
            Some(s) => payload.extend_from_slice(&[
                s.weekday,
                s.start_hour,
                s.start_minute,
                s.stop_hour,
                s.stop_minute,
            ]),
            None => payload.extend_from_slice(&[ABSENT; 5]),
        }
        raw(ScheduleEntryLockCommand::WeekDayScheduleSet, payload)
    }
}

/// Query one weekday schedule slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WeekDayScheduleGet {
    pub user_id: u8,
    pub slot_id: u8,
}

impl WeekDayScheduleGet {
    pub fn parse(payload: &[u8]) -> Result<Self, PayloadError> {
        if payload.len() < 2 {
            return Err(PayloadError::PayloadTooShort {
                expected: 2,
                got: payload.len(),
            });
        }
        Ok(Self {
            user_id: payload[0],
            slot_id: payload[1],
        })
    }

    pub fn to_raw(&self) -> CommandRaw {
        raw(
            ScheduleEntryLockCommand::WeekDayScheduleGet,
            vec![self.user_id, self.slot_id],
        )
    }
}

/// Contents of one weekday schedule slot; `0xFF` fields are absent.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WeekDayScheduleReport {
    pub user_id: u8,
    pub slot_id: u8,
    pub weekday: Option<u8>,
    pub start_hour: Option<u8>,
    pub start_minute: Option<u8>,
    pub stop_hour: Option<u8>,
    pub stop_minute: Option<u8>,
}

impl WeekDayScheduleReport {
    pub fn parse(payload: &[u8]) -> Result<Self, PayloadError> {
        if payload.len() < 7 {
            return Err(PayloadError::PayloadTooShort {
                expected: 7,
                got: payload.len(),
            });
        }
        let field = |b: u8| if b == ABSENT { None } else { Some(b) };
        Ok(Self {
            user_id: payload[0],
            slot_id: payload[1],
            weekday: field(payload[2]),
            start_hour: field(payload[3]),
            start_minute: field(payload[4]),
            stop_hour: field(payload[5]),
            stop_minute: field(payload[6]),
        })
    }

    pub fn to_raw(&self) -> CommandRaw {
        let field = |v: Option<u8>| v.unwrap_or(ABSENT);
        raw(
            ScheduleEntryLockCommand::WeekDayScheduleReport,
            vec![
                self.user_id,
                self.slot_id,
                field(self.weekday),
                field(self.start_hour),
                field(self.start_minute),
                field(self.stop_hour),
                field(self.stop_minute),
            ],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ===== Enable Tests =====

    #[test]
    fn test_enable_set_roundtrip() {
        let set = EnableSet {
            user_id: 4,
            enabled: true,
        };
        let raw = set.to_raw();
        assert_eq!(raw.payload, vec![4, 1]);
        assert_eq!(EnableSet::parse(&raw.payload).unwrap(), set);

        assert!(EnableSet::parse(&[4, 2]).is_err());
    }

    #[test]
    fn test_enable_all_set_roundtrip() {
        let set = EnableAllSet { enabled: false };
        assert_eq!(set.to_raw().payload, vec![0]);
        assert_eq!(EnableAllSet::parse(&[0]).unwrap(), set);
    }

    // ===== Supported Report Tests =====

    #[test]
    fn test_supported_report_two_bytes() {
        let report = SupportedReport {
            num_week_day_slots: 7,
            num_year_day_slots: 2,
            num_daily_repeating_slots: None,
        };
        let raw = report.to_raw();
        assert_eq!(raw.payload, vec![7, 2]);
        assert_eq!(SupportedReport::parse(&raw.payload).unwrap(), report);
    }

    #[test]
    fn test_supported_report_three_bytes() {
        let report = SupportedReport {
            num_week_day_slots: 7,
            num_year_day_slots: 2,
            num_daily_repeating_slots: Some(5),
        };
        let raw = report.to_raw();
        assert_eq!(raw.payload, vec![7, 2, 5]);
        assert_eq!(SupportedReport::parse(&raw.payload).unwrap(), report);
    }

    // ===== Weekday Schedule Tests =====

    #[test]
    fn test_week_day_schedule_erase_encoding() {
        let set = WeekDayScheduleSet {
            user_id: 3,
            slot_id: 2,
            schedule: None,
        };
        let raw = set.to_raw();
        assert_eq!(
            raw.payload,
            vec![0x00, 0x03, 0x02, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]
        );

        let parsed = WeekDayScheduleSet::parse(&raw.payload).unwrap();
        assert_eq!(parsed, set);
        assert!(parsed.schedule.is_none());
    }

    #[test]
    fn test_week_day_schedule_set_roundtrip() {
        let set = WeekDayScheduleSet {
            user_id: 1,
            slot_id: 1,
            schedule: Some(WeekDaySchedule {
                weekday: 2,
                start_hour: 8,
                start_minute: 30,
                stop_hour: 17,
                stop_minute: 0,
            }),
        };
        let raw = set.to_raw();
        assert_eq!(raw.payload, vec![1, 1, 1, 2, 8, 30, 17, 0]);
        assert_eq!(WeekDayScheduleSet::parse(&raw.payload).unwrap(), set);
    }

    #[test]
    fn test_week_day_schedule_set_short_payload() {
        // Erase accepts 3 bytes
        let parsed = WeekDayScheduleSet::parse(&[0, 3, 2]).unwrap();
        assert!(parsed.schedule.is_none());

        // Set does not
        assert!(matches!(
            WeekDayScheduleSet::parse(&[1, 3, 2, 4]),
            Err(PayloadError::PayloadTooShort { expected: 8, .. })
        ));
    }

    #[test]
    fn test_week_day_schedule_set_bad_action() {
        assert!(matches!(
            WeekDayScheduleSet::parse(&[2, 0, 0]),
            Err(PayloadError::InvalidField {
                field: "action",
                value: 2
            })
        ));
    }

    #[test]
    fn test_week_day_schedule_report_absence() {
        let report = WeekDayScheduleReport {
            user_id: 3,
            slot_id: 2,
            weekday: None,
            start_hour: None,
            start_minute: None,
            stop_hour: None,
            stop_minute: None,
        };
        let raw = report.to_raw();
        assert_eq!(raw.payload[2..], [0xFF; 5]);
        assert_eq!(WeekDayScheduleReport::parse(&raw.payload).unwrap(), report);
    }

    #[test]
    fn test_week_day_schedule_report_partial_fields() {
        let bytes = [3, 2, 0x01, 0x08, 0xFF, 0x11, 0xFF];
        let report = WeekDayScheduleReport::parse(&bytes).unwrap();
        assert_eq!(report.weekday, Some(1));
        assert_eq!(report.start_hour, Some(8));
        assert_eq!(report.start_minute, None);
        assert_eq!(report.stop_hour, Some(0x11));
        assert_eq!(report.stop_minute, None);
        assert_eq!(report.to_raw().payload, bytes);
    }

    #[test]
    fn test_week_day_schedule_get_roundtrip() {
        let get = WeekDayScheduleGet {
            user_id: 9,
            slot_id: 1,
        };
        assert_eq!(get.to_raw().payload, vec![9, 1]);
        assert_eq!(WeekDayScheduleGet::parse(&[9, 1]).unwrap(), get);
    }
}
