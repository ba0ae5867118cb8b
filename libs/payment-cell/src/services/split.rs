// libs/payment-cell/src/services/split.rs
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::AllocationError;
use crate::models::{MinorUnits, PaymentMethod};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SplitRow {
    pub id: Uuid,
    pub method: PaymentMethod,
    pub amount: MinorUnits,
    #[serde(default)]
    pub is_user_edited: bool,
}

impl SplitRow {
    pub fn new(method: PaymentMethod, amount: MinorUnits) -> Self {
        Self {
            id: Uuid::new_v4(),
            method,
            amount,
            is_user_edited: false,
        }
    }
}

/// One leg of a validated breakdown, in execution order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PaymentLeg {
    pub method: PaymentMethod,
    pub amount: MinorUnits,
}

/// Keeps a multi-method breakdown reconciled against a fixed total.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitAllocator {
    total_due: MinorUnits,
    rows: Vec<SplitRow>,
}

impl SplitAllocator {
    /// Starts with a single cash row carrying the whole amount.
    pub fn new(total_due: MinorUnits) -> Self {
        let total_due = total_due.max(0);
        Self {
            total_due,
            rows: vec![SplitRow::new(PaymentMethod::Cash, total_due)],
        }
    }

    /// Adopt a breakdown as-is, e.g. one submitted by a client for validation.
    pub fn from_rows(total_due: MinorUnits, rows: Vec<SplitRow>) -> Self {
        Self { total_due, rows }
    }

    pub fn total_due(&self) -> MinorUnits {
        self.total_due
    }

    pub fn rows(&self) -> &[SplitRow] {
        &self.rows
    }

    /// Sum of all rows, saturating at the `i64` bounds.
    pub fn allocated(&self) -> MinorUnits {
        saturating_sum(self.rows.iter())
    }

    pub fn unallocated(&self) -> MinorUnits {
        self.total_due.saturating_sub(self.allocated())
    }

    /// Exact sum of all rows, or `AmountOverflow` when it does not fit.
    pub fn checked_allocated(&self) -> Result<MinorUnits, AllocationError> {
        self.rows
            .iter()
            .try_fold(0 as MinorUnits, |acc, r| acc.checked_add(r.amount))
            .ok_or(AllocationError::AmountOverflow)
    }

    pub fn add_row(&mut self) -> Uuid {
        self.add_row_with_method(PaymentMethod::Cash)
    }

    /// New rows pick up whatever is still unallocated (often zero).
    pub fn add_row_with_method(&mut self, method: PaymentMethod) -> Uuid {
        let row = SplitRow::new(method, self.unallocated().max(0));
        let id = row.id;
        self.rows.push(row);
        id
    }

    pub fn update_row_method(&mut self, row_id: Uuid, method: PaymentMethod) -> Result<(), AllocationError> {
        let row = self.row_mut(row_id)?;
        row.method = method;
        Ok(())
    }

    pub fn update_row_amount(&mut self, row_id: Uuid, new_amount: MinorUnits) -> Result<(), AllocationError> {
        let total_due = self.total_due;
        let edited = self.row_mut(row_id)?;
        edited.amount = new_amount.clamp(0, total_due.max(0));
        edited.is_user_edited = true;
        let edited_amount = edited.amount;

        match self.rows.len() {
            0 | 1 => {}
            2 => {
                if let Some(other) = self.rows.iter_mut().find(|r| r.id != row_id) {
                    other.amount = total_due.saturating_sub(edited_amount).max(0);
                    other.is_user_edited = false;
                }
            }
            _ => {
                let edited_total = saturating_sum(self.rows.iter().filter(|r| r.is_user_edited));
                let remainder = total_due.saturating_sub(edited_total).max(0);
                self.spread_over_untouched(remainder);
            }
        }

        debug!(
            "Split row {} set to {}, allocated {}/{}",
            row_id,
            edited_amount,
            self.allocated(),
            total_due
        );
        Ok(())
    }

    pub fn remove_row(&mut self, row_id: Uuid) -> Result<(), AllocationError> {
        let index = self
            .rows
            .iter()
            .position(|r| r.id == row_id)
            .ok_or(AllocationError::RowNotFound(row_id))?;
        if self.rows.len() <= 1 {
            return Err(AllocationError::LastRow);
        }
        self.rows.remove(index);

        let difference = self.unallocated();
        if difference != 0 {
            let target = match self.rows.iter().position(|r| !r.is_user_edited) {
                Some(i) => i,
                None => self.rows.len() - 1,
            };
            let row = &mut self.rows[target];
            // Never push a row below zero; the shortfall then shows up in validation.
            row.amount = row.amount.saturating_add(difference).max(0);
        }
        Ok(())
    }

    /// Forget user edits and share the total evenly across all rows.
    pub fn reset_distribution(&mut self) {
        for row in &mut self.rows {
            row.is_user_edited = false;
        }
        let total_due = self.total_due.max(0);
        self.spread_over_untouched(total_due);
    }

    pub fn validate(&self) -> Result<(), AllocationError> {
        if self.total_due < 0 {
            return Err(AllocationError::NegativeTotal(self.total_due));
        }
        if self.rows.is_empty() {
            return Err(AllocationError::NoRows);
        }
        if let Some(row) = self.rows.iter().find(|r| r.amount < 0) {
            return Err(AllocationError::NegativeAmount { row_id: row.id });
        }
        let allocated = self.checked_allocated()?;
        // Whole minor units: the 0.01 rounding tolerance collapses to exact equality.
        if allocated != self.total_due {
            return Err(AllocationError::Unreconciled {
                allocated,
                total_due: self.total_due,
            });
        }
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// True when cash and at least one device-mediated method both carry money.
    pub fn has_mixed_payment(&self) -> bool {
        let has_cash = self
            .rows
            .iter()
            .any(|r| r.method == PaymentMethod::Cash && r.amount > 0);
        let has_device = self
            .rows
            .iter()
            .any(|r| r.method.is_device_mediated() && r.amount > 0);
        has_cash && has_device
    }

    /// Execution plan for a valid breakdown: one combined cash leg first,
    /// then each card/UPI row with money on it, in listed order.
    pub fn payment_legs(&self) -> Result<Vec<PaymentLeg>, AllocationError> {
        self.validate()?;

        // Validated rows are non-negative and add up to total_due, so this cannot overflow.
        let cash = saturating_sum(self.rows.iter().filter(|r| r.method == PaymentMethod::Cash));

        let mut legs = Vec::with_capacity(self.rows.len());
        if cash > 0 {
            legs.push(PaymentLeg { method: PaymentMethod::Cash, amount: cash });
        }
        legs.extend(
            self.rows
                .iter()
                .filter(|r| r.method.is_device_mediated() && r.amount > 0)
                .map(|r| PaymentLeg { method: r.method, amount: r.amount }),
        );
        Ok(legs)
    }

    fn row_mut(&mut self, row_id: Uuid) -> Result<&mut SplitRow, AllocationError> {
        self.rows
            .iter_mut()
            .find(|r| r.id == row_id)
            .ok_or(AllocationError::RowNotFound(row_id))
    }

    /// Even split across rows not marked user-edited; leftover minor units go
    /// to the earliest rows so the shares still add up exactly.
    fn spread_over_untouched(&mut self, amount: MinorUnits) {
        let untouched = self.rows.iter().filter(|r| !r.is_user_edited).count() as MinorUnits;
        if untouched == 0 {
            return;
        }
        let base = amount / untouched;
        let leftover = amount % untouched;
        for (i, row) in self.rows.iter_mut().filter(|r| !r.is_user_edited).enumerate() {
            row.amount = base + if (i as MinorUnits) < leftover { 1 } else { 0 };
        }
    }
}

fn saturating_sum<'a>(rows: impl Iterator<Item = &'a SplitRow>) -> MinorUnits {
    rows.fold(0, |acc, r| acc.saturating_add(r.amount))
}
