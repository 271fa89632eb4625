// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Credit cost schedule for authorization requests.

/// Fee components, in credit units.
///
/// The cost of a request is computed exactly once at creation from the stored
/// content binding and never recomputed later; changing the schedule affects
/// new requests only.
#[derive(Debug, Clone, Copy)]
pub struct FeeSchedule {
    /// Flat fee per email
    pub base_fee: u64,
    /// Fee per attachment
    pub attachment_fee: u64,
    /// Flat fee for the on-chain record
    pub record_fee: u64,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            base_fee: 3,
            attachment_fee: 2,
            record_fee: 1,
        }
    }
}

impl FeeSchedule {
    /// Credit units required for an email with `attachment_count` attachments.
    pub fn cost(&self, attachment_count: usize) -> u64 {
        self.base_fee
            .saturating_add(self.attachment_fee.saturating_mul(attachment_count as u64))
            .saturating_add(self.record_fee)
    }
}
