//! Escrow Engine
//!
//! Crowdfunding campaigns: creation (fee), pledges into escrow and the close
//! that pays the owner or refunds every pledger.

use chrono::{DateTime, Months, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::core_types::{AccountId, CompanyId, Endpoint, Scope, UserId};
use crate::error::LedgerError;
use crate::guard::AbuseGuard;
use crate::models::{AccountTransaction, CrowdfundCompany, ForbiddenUserAction, NewCompany};
use crate::store::{AccountStore, CrowdfundStore};
use crate::transfer::TransferService;

/// Fee charged to the owner for opening a campaign
pub const CREATE_COMPANY_PRICE: Decimal = Decimal::from_parts(4, 0, 0, false, 0);
pub const MIN_GOAL: Decimal = Decimal::from_parts(8, 0, 0, false, 0);
pub const MAX_TITLE_CHARS: usize = 48;
pub const MAX_DESCRIPTION_CHARS: usize = 512;
/// Latest allowed end date, counted from creation
pub const MAX_DURATION_MONTHS: u32 = 2;

/// Caller-supplied campaign fields
#[derive(Debug, Clone)]
pub struct CompanyDraft {
    pub title: String,
    pub short_description: String,
    pub goal: Decimal,
    pub end_date: DateTime<Utc>,
}

/// Outcome of one campaign close
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CloseReport {
    pub company: CompanyId,
    /// Paid out to the owner (true) or refunded (false)
    pub success: bool,
    /// Pledges credited by this close
    pub settled: usize,
    /// Pledges already settled by an earlier, interrupted close
    pub skipped: usize,
    /// Pledges that landed while the close ran; always refunded
    pub late_refunds: usize,
    /// Sum credited by this close
    pub amount: Decimal,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SweepReport {
    pub closed: usize,
    pub failed: usize,
    /// Escrowed pledges of already-closed campaigns handed back
    pub refunded: usize,
}

pub struct EscrowEngine {
    companies: Arc<dyn CrowdfundStore>,
    accounts: Arc<dyn AccountStore>,
    guard: Arc<AbuseGuard>,
    transfers: Arc<TransferService>,
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

impl EscrowEngine {
    pub fn new(
        companies: Arc<dyn CrowdfundStore>,
        accounts: Arc<dyn AccountStore>,
        guard: Arc<AbuseGuard>,
        transfers: Arc<TransferService>,
    ) -> Self {
        Self {
            companies,
            accounts,
            guard,
            transfers,
        }
    }

    /// Open a campaign after charging the creation fee.
    ///
    /// Nothing is created unless the fee transfer committed.
    pub async fn create_company(
        &self,
        owner: UserId,
        draft: CompanyDraft,
        scope: Scope,
    ) -> Result<CrowdfundCompany, LedgerError> {
        self.guard
            .ensure_allowed(owner, ForbiddenUserAction::CreateCrowdfundings, scope)
            .await?;

        let now = Utc::now();
        let latest = now
            .checked_add_months(Months::new(MAX_DURATION_MONTHS))
            .ok_or_else(|| LedgerError::Internal("end date bound overflow".into()))?;
        if draft.goal < MIN_GOAL {
            return Err(LedgerError::validation(format!(
                "goal must be at least {}",
                MIN_GOAL
            )));
        }
        if draft.end_date <= now || draft.end_date > latest {
            return Err(LedgerError::validation(format!(
                "end date must be within {} months from now",
                MAX_DURATION_MONTHS
            )));
        }

        let fee = self
            .transfers
            .create_internal_transaction(
                owner,
                CREATE_COMPANY_PRICE,
                Endpoint::SystemSink(Endpoint::STARTER_SINK.to_string()),
                scope,
            )
            .await?;

        let company = self
            .companies
            .insert_company(NewCompany {
                owner,
                scope,
                title: truncate_chars(&draft.title, MAX_TITLE_CHARS),
                short_description: truncate_chars(&draft.short_description, MAX_DESCRIPTION_CHARS),
                goal: draft.goal,
                end_date: draft.end_date,
            })
            .await?;

        info!(
            company_id = %company.id,
            owner = %owner,
            goal = %company.goal,
            end_date = %company.end_date,
            fee_tx = %fee.id,
            scope = %scope,
            "Crowdfunding company created"
        );
        Ok(company)
    }

    /// Pledge `amount` from the user's default account into the campaign's escrow
    pub async fn support_company(
        &self,
        user: UserId,
        company_id: CompanyId,
        amount: Decimal,
        scope: Scope,
    ) -> Result<AccountTransaction, LedgerError> {
        self.guard
            .ensure_allowed(user, ForbiddenUserAction::CreateTransactions, scope)
            .await?;

        let company = self.company(scope, company_id).await?;
        if company.owner == user {
            return Err(LedgerError::CantSupportYourOwnCompany);
        }
        if amount <= Decimal::ZERO {
            return Err(LedgerError::validation("amount must be positive"));
        }
        if company.is_over {
            return Err(LedgerError::CompanyClosed);
        }

        let tx = self
            .transfers
            .create_internal_transaction(user, amount, Endpoint::Escrow(company.id), scope)
            .await?;

        let updated = match self.companies.add_pledge(company.id, tx.id, tx.amount).await {
            Ok(updated) => updated,
            Err(e) => {
                // Money sits in escrow with no campaign attribution
                error!(tx_id = %tx.id, company_id = %company.id, error = %e, "Pledge committed but not attributed");
                return Err(e);
            }
        };

        if updated.is_over {
            // Campaign closed between the check and the pledge; hand the money back
            let refunded = match tx.source.account() {
                Some(source) => self.companies.settle_pledge(company.id, tx.id, source).await?,
                None => false,
            };
            warn!(tx_id = %tx.id, company_id = %company.id, refunded, "Pledge raced campaign close");
            return Err(LedgerError::CompanyClosed);
        }

        info!(
            tx_id = %tx.id,
            company_id = %company.id,
            user_id = %user,
            amount = %tx.amount,
            current = %updated.current_amount,
            goal = %updated.goal,
            scope = %scope,
            "Company supported"
        );
        Ok(tx)
    }

    /// Owner or admin ends the campaign early and every pledge is refunded
    pub async fn cancel_company(
        &self,
        actor: UserId,
        is_admin: bool,
        company_id: CompanyId,
        scope: Scope,
    ) -> Result<CloseReport, LedgerError> {
        let company = self.company(scope, company_id).await?;
        if !is_admin && company.owner != actor {
            return Err(LedgerError::NotOwner);
        }
        self.close_company(scope, company_id, false).await
    }

    /// Owner or admin ends the campaign with a payout.
    ///
    /// Non-admin owners can only accept once the goal is reached.
    pub async fn accept_company(
        &self,
        actor: UserId,
        is_admin: bool,
        company_id: CompanyId,
        scope: Scope,
    ) -> Result<CloseReport, LedgerError> {
        let company = self.company(scope, company_id).await?;
        if !is_admin && company.owner != actor {
            return Err(LedgerError::NotOwner);
        }
        if !is_admin && !company.goal_reached() {
            return Err(LedgerError::GoalNotReached);
        }
        self.close_company(scope, company_id, true).await
    }

    /// Settle every pledge and latch `is_over`.
    ///
    /// Each pledge settles atomically on its own. A close interrupted midway
    /// leaves `is_over` false; running it again credits only the pledges
    /// still held in escrow. Once `is_over` is latched the pledge list is read
    /// again and anything that slipped in meanwhile goes back to its source;
    /// pledges arriving after the latch are refunded by `support_company`.
    pub async fn close_company(
        &self,
        scope: Scope,
        company_id: CompanyId,
        success: bool,
    ) -> Result<CloseReport, LedgerError> {
        let company = self.company(scope, company_id).await?;
        if company.is_over {
            return Err(LedgerError::CompanyClosed);
        }

        let owner_account = if success {
            let account = self
                .accounts
                .default_account(scope, company.owner)
                .await?
                .ok_or(LedgerError::AccountNotFound)?;
            Some(account.id)
        } else {
            None
        };

        let pledges = self.companies.pledges(company.id).await?;
        let mut report = CloseReport {
            company: company.id,
            success,
            settled: 0,
            skipped: 0,
            late_refunds: 0,
            amount: Decimal::ZERO,
        };
        self.settle_pledges(company.id, &pledges, owner_account, &mut report)
            .await?;

        if !self.companies.mark_over(company.id).await? {
            warn!(company_id = %company.id, "Company was closed concurrently");
        }

        // Pledges committed after the read above but before the latch
        let before = report.settled;
        let late = self.companies.pledges(company.id).await?;
        let late: Vec<_> = late
            .into_iter()
            .filter(|p| p.destination.is_escrow_of(company.id))
            .collect();
        self.settle_pledges(company.id, &late, None, &mut report)
            .await?;
        report.late_refunds = report.settled - before;
        if report.late_refunds > 0 {
            warn!(company_id = %company.id, refunded = report.late_refunds, "Refunded pledges that raced the close");
        }

        info!(
            company_id = %company.id,
            success,
            settled = report.settled,
            skipped = report.skipped,
            late_refunds = report.late_refunds,
            amount = %report.amount,
            scope = %scope,
            "Crowdfunding company closed"
        );
        Ok(report)
    }

    /// Settle `pledges` to `owner_account`, or back to their sources when `None`
    async fn settle_pledges(
        &self,
        company: CompanyId,
        pledges: &[AccountTransaction],
        owner_account: Option<AccountId>,
        report: &mut CloseReport,
    ) -> Result<(), LedgerError> {
        for pledge in pledges {
            let recipient = match owner_account.or_else(|| pledge.source.account()) {
                Some(id) => id,
                None => {
                    error!(tx_id = %pledge.id, source = %pledge.source, "Pledge has no refundable source");
                    return Err(LedgerError::Internal(format!(
                        "pledge {} has no source account",
                        pledge.id
                    )));
                }
            };

            if self
                .companies
                .settle_pledge(company, pledge.id, recipient)
                .await?
            {
                report.settled += 1;
                report.amount += pledge.amount;
                debug!(tx_id = %pledge.id, recipient = %recipient, amount = %pledge.amount, "Pledge settled");
            } else {
                report.skipped += 1;
            }
        }
        Ok(())
    }

    /// Refund pledges still held by campaigns that are already over.
    ///
    /// Only a close that stopped between latching `is_over` and its final
    /// refund pass leaves these behind.
    pub async fn refund_stranded(&self) -> Result<usize, LedgerError> {
        let mut refunded = 0;
        for company in self.companies.stranded_companies().await? {
            let pledges: Vec<_> = self
                .companies
                .pledges(company.id)
                .await?
                .into_iter()
                .filter(|p| p.destination.is_escrow_of(company.id))
                .collect();
            let mut report = CloseReport {
                company: company.id,
                success: false,
                settled: 0,
                skipped: 0,
                late_refunds: 0,
                amount: Decimal::ZERO,
            };
            self.settle_pledges(company.id, &pledges, None, &mut report)
                .await?;
            if report.settled > 0 {
                warn!(
                    company_id = %company.id,
                    scope = %company.scope,
                    refunded = report.settled,
                    amount = %report.amount,
                    "Refunded stranded pledges of closed company"
                );
            }
            refunded += report.settled;
        }
        Ok(refunded)
    }

    /// Close every campaign past its end date; paid out if the goal is reached
    pub async fn close_due(&self, now: DateTime<Utc>) -> Result<SweepReport, LedgerError> {
        let due = self.companies.due_companies(now).await?;
        let mut report = SweepReport::default();

        match self.refund_stranded().await {
            Ok(n) => report.refunded = n,
            Err(e) => {
                error!(error = %e, "Failed to refund stranded pledges");
                report.failed += 1;
            }
        }

        for company in due {
            match self
                .close_company(company.scope, company.id, company.goal_reached())
                .await
            {
                Ok(_) => report.closed += 1,
                // Closed by a user between the scan and now
                Err(LedgerError::CompanyClosed) => {}
                Err(e) => {
                    error!(company_id = %company.id, scope = %company.scope, error = %e, "Failed to close due company");
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    pub async fn company(
        &self,
        scope: Scope,
        id: CompanyId,
    ) -> Result<CrowdfundCompany, LedgerError> {
        self.companies
            .get_company(scope, id)
            .await?
            .ok_or(LedgerError::CompanyNotFound)
    }
}
