//! Command registry: `(cc_id, command)` → codec.
//!
//! One table, built at startup, mapping command identifiers to their
//! decoders and to the CC-level metadata the encapsulation policy needs.
//! No registration happens at runtime beyond constructing this table.

use super::schedule_entry_lock::{
    EnableAllSet, EnableSet, ScheduleEntryLockCommand, SupportedGet, SupportedReport,
    WeekDayScheduleGet, WeekDayScheduleReport, WeekDayScheduleSet,
};
use super::{CommandClasses, CommandRaw, PayloadError};
use crate::s2::kex::{
    CommandsSupportedGet, CommandsSupportedReport, KexFail, KexGet, KexReport, KexSet,
    NetworkKeyGet, NetworkKeyReport, NetworkKeyVerify, PublicKeyReport, TransferEnd,
};
use crate::s2::nonce::{NonceGet, NonceReport};
use crate::s2::Security2Command;
use std::collections::HashMap;

/// A decoded, typed command.
#[derive(Clone, Debug, PartialEq)]
pub enum KnownCommand {
    // Security 2
    S2NonceGet(NonceGet),
    S2NonceReport(NonceReport),
    S2KexGet(KexGet),
    S2KexReport(KexReport),
    S2KexSet(KexSet),
    S2KexFail(KexFail),
    S2PublicKeyReport(PublicKeyReport),
    S2NetworkKeyGet(NetworkKeyGet),
    S2NetworkKeyReport(NetworkKeyReport),
    S2NetworkKeyVerify(NetworkKeyVerify),
    S2TransferEnd(TransferEnd),
    S2CommandsSupportedGet(CommandsSupportedGet),
    S2CommandsSupportedReport(CommandsSupportedReport),
    // Schedule Entry Lock
    ScheduleEnableSet(EnableSet),
    ScheduleEnableAllSet(EnableAllSet),
    ScheduleSupportedGet(SupportedGet),
    ScheduleSupportedReport(SupportedReport),
    ScheduleWeekDaySet(WeekDayScheduleSet),
    ScheduleWeekDayGet(WeekDayScheduleGet),
    ScheduleWeekDayReport(WeekDayScheduleReport),
}

type DecodeFn = fn(&[u8]) -> Result<KnownCommand, PayloadError>;

/// Registry entry for one command.
struct CommandSpec {
    /// Whether this command's CC carries the `Security` encapsulation
    /// flag.
    secure: bool,
    decode: DecodeFn,
}

/// The startup-built command table.
pub struct CommandRegistry {
    entries: HashMap<(u8, u8), CommandSpec>,
}

impl CommandRegistry {
    /// Build the standard table for the commands this crate speaks.
    pub fn standard() -> Self {
        let mut registry = Self {
            entries: HashMap::new(),
        };

        // The encapsulation layer itself is never re-encapsulated
        // wholesale; the policy picks out its secure commands (see
        // `requires_encapsulation`).
        let s2 = CommandClasses::Security2.to_byte();
        use Security2Command as S2;
        registry.insert(s2, S2::NonceGet.to_byte(), true, |p| {
            NonceGet::parse(p).map(KnownCommand::S2NonceGet)
        });
        registry.insert(s2, S2::NonceReport.to_byte(), true, |p| {
            NonceReport::parse(p).map(KnownCommand::S2NonceReport)
        });
        registry.insert(s2, S2::KexGet.to_byte(), true, |p| {
            KexGet::parse(p).map(KnownCommand::S2KexGet)
        });
        registry.insert(s2, S2::KexReport.to_byte(), true, |p| {
            KexReport::parse(p).map(KnownCommand::S2KexReport)
        });
        registry.insert(s2, S2::KexSet.to_byte(), true, |p| {
            KexSet::parse(p).map(KnownCommand::S2KexSet)
        });
        registry.insert(s2, S2::KexFail.to_byte(), true, |p| {
            KexFail::parse(p).map(KnownCommand::S2KexFail)
        });
        registry.insert(s2, S2::PublicKeyReport.to_byte(), true, |p| {
            PublicKeyReport::parse(p).map(KnownCommand::S2PublicKeyReport)
        });
        registry.insert(s2, S2::NetworkKeyGet.to_byte(), true, |p| {
            NetworkKeyGet::parse(p).map(KnownCommand::S2NetworkKeyGet)
        });
        registry.insert(s2, S2::NetworkKeyReport.to_byte(), true, |p| {
            NetworkKeyReport::parse(p).map(KnownCommand::S2NetworkKeyReport)
        });
        registry.insert(s2, S2::NetworkKeyVerify.to_byte(), true, |p| {
            NetworkKeyVerify::parse(p).map(KnownCommand::S2NetworkKeyVerify)
        });
        registry.insert(s2, S2::TransferEnd.to_byte(), true, |p| {
            TransferEnd::parse(p).map(KnownCommand::S2TransferEnd)
        });
        registry.insert(s2, S2::CommandsSupportedGet.to_byte(), true, |p| {
            CommandsSupportedGet::parse(p).map(KnownCommand::S2CommandsSupportedGet)
        });
        registry.insert(s2, S2::CommandsSupportedReport.to_byte(), true, |p| {
            CommandsSupportedReport::parse(p).map(KnownCommand::S2CommandsSupportedReport)
        });

        let sel = CommandClasses::ScheduleEntryLock.to_byte();
        use ScheduleEntryLockCommand as Sel;
        registry.insert(sel, Sel::EnableSet.to_byte(), true, |p| {
            EnableSet::parse(p).map(KnownCommand::ScheduleEnableSet)
        });
        registry.insert(sel, Sel::EnableAllSet.to_byte(), true, |p| {
            EnableAllSet::parse(p).map(KnownCommand::ScheduleEnableAllSet)
        });
        registry.insert(sel, Sel::SupportedGet.to_byte(), true, |p| {
            SupportedGet::parse(p).map(KnownCommand::ScheduleSupportedGet)
        });
        registry.insert(sel, Sel::SupportedReport.to_byte(), true, |p| {
            SupportedReport::parse(p).map(KnownCommand::ScheduleSupportedReport)
        });
        registry.insert(sel, Sel::WeekDayScheduleSet.to_byte(), true, |p| {
            WeekDayScheduleSet::parse(p).map(KnownCommand::ScheduleWeekDaySet)
        });
        registry.insert(sel, Sel::WeekDayScheduleGet.to_byte(), true, |p| {
            WeekDayScheduleGet::parse(p).map(KnownCommand::ScheduleWeekDayGet)
        });
        registry.insert(sel, Sel::WeekDayScheduleReport.to_byte(), true, |p| {
            WeekDayScheduleReport::parse(p).map(KnownCommand::ScheduleWeekDayReport)
        });

        registry
    }

    fn insert(&mut self, cc_id: u8, command: u8, secure: bool, decode: DecodeFn) {
        self.entries
            .insert((cc_id, command), CommandSpec { secure, decode });
    }

    /// Decode a raw frame through the table.
    pub fn decode(&self, raw: &CommandRaw) -> Result<KnownCommand, PayloadError> {
        let spec = self
            .entries
            .get(&(raw.cc_id, raw.command))
            .ok_or(PayloadError::UnknownCommand {
                cc_id: raw.cc_id,
                command: raw.command,
            })?;
        (spec.decode)(&raw.payload)
    }

    /// Whether a command's CC demands the `Security` encapsulation flag.
    /// Unregistered commands default to insecure.
    pub fn is_secure(&self, cc_id: u8, command: u8) -> bool {
        self.entries
            .get(&(cc_id, command))
            .map(|spec| spec.secure)
            .unwrap_or(false)
    }
}
