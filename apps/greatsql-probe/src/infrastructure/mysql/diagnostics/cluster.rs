//! Group replication (MGR) membership and queue depth diagnostics

use std::fmt;

use super::snapshot::{column_i64, column_str};
use super::thresholds::{classify_finding, CLUSTER_QUEUE_DEPTH};
use super::{DiagnosticError, Finding, Findings, QueryExecutor, Row};

const MEMBERS_QUERY: &str = "SELECT MEMBER_ID, MEMBER_HOST, MEMBER_PORT, MEMBER_STATE, MEMBER_ROLE \
     FROM performance_schema.replication_group_members";

const MEMBER_STATS_QUERY: &str = "SELECT m.MEMBER_ID, m.MEMBER_HOST, m.MEMBER_PORT, \
     s.COUNT_TRANSACTIONS_IN_QUEUE, s.COUNT_TRANSACTIONS_REMOTE_IN_APPLIER_QUEUE \
     FROM performance_schema.replication_group_member_stats s \
     JOIN performance_schema.replication_group_members m ON s.MEMBER_ID = m.MEMBER_ID";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemberState {
    Online,
    Offline,
    Recovering,
    Error,
    Unreachable,
    Other(String),
}

impl MemberState {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "ONLINE" => MemberState::Online,
            "OFFLINE" => MemberState::Offline,
            "RECOVERING" => MemberState::Recovering,
            "ERROR" => MemberState::Error,
            "UNREACHABLE" => MemberState::Unreachable,
            _ => MemberState::Other(raw.trim().to_string()),
        }
    }
}

impl fmt::Display for MemberState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemberState::Online => f.write_str("ONLINE"),
            MemberState::Offline => f.write_str("OFFLINE"),
            MemberState::Recovering => f.write_str("RECOVERING"),
            MemberState::Error => f.write_str("ERROR"),
            MemberState::Unreachable => f.write_str("UNREACHABLE"),
            MemberState::Other(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClusterMember {
    pub member_id: String,
    pub host: String,
    pub port: Option<i64>,
    pub state: MemberState,
}

impl ClusterMember {
    pub fn from_row(row: &Row) -> Self {
        Self {
            member_id: column_str(row, "MEMBER_ID").unwrap_or_default(),
            host: column_str(row, "MEMBER_HOST").unwrap_or_default(),
            port: column_i64(row, "MEMBER_PORT"),
            state: MemberState::parse(&column_str(row, "MEMBER_STATE").unwrap_or_default()),
        }
    }
}

/// Queue depths of one member joined with its identity
#[derive(Debug, Clone, PartialEq)]
pub struct MemberQueueStats {
    pub member_id: String,
    pub host: String,
    pub port: Option<i64>,
    /// Transactions waiting for conflict detection
    pub certification_queue: i64,
    /// Remote transactions waiting to be applied
    pub applier_queue: i64,
}

impl MemberQueueStats {
    pub fn from_row(row: &Row) -> Self {
        Self {
            member_id: column_str(row, "MEMBER_ID").unwrap_or_default(),
            host: column_str(row, "MEMBER_HOST").unwrap_or_default(),
            port: column_i64(row, "MEMBER_PORT"),
            certification_queue: column_i64(row, "COUNT_TRANSACTIONS_IN_QUEUE").unwrap_or(0),
            applier_queue: column_i64(row, "COUNT_TRANSACTIONS_REMOTE_IN_APPLIER_QUEUE")
                .unwrap_or(0),
        }
    }

    fn address(&self) -> String {
        match self.port {
            Some(port) => format!("{}:{}", self.host, port),
            None => self.host.clone(),
        }
    }
}

/// Quorum findings for the current membership
pub fn analyze_membership(members: &[ClusterMember]) -> Findings {
    let mut findings = Findings::new();

    if members.is_empty() {
        findings.insert(Finding::info(
            "mgr_enabled",
            "Group replication is not enabled",
        ));
        return findings;
    }

    let online = members
        .iter()
        .filter(|m| m.state == MemberState::Online)
        .count();

    let finding = if online > 0 {
        Finding::info(
            "mgr_status",
            format!(
                "Group replication healthy: {} of {} members ONLINE",
                online,
                members.len()
            ),
        )
    } else if members.len() == 1 && members[0].state == MemberState::Offline {
        Finding::info(
            "mgr_status",
            "Group replication plugin is present but the group has not been bootstrapped",
        )
    } else {
        let states: Vec<String> = members
            .iter()
            .map(|m| format!("{}={}", m.host, m.state))
            .collect();
        Finding::critical(
            "mgr_status",
            format!(
                "No ONLINE members in the replication group ({})",
                states.join(", ")
            ),
        )
    };
    findings.insert(finding);

    findings
}

/// Per-member queue depth findings
pub fn analyze_queues(stats: &[MemberQueueStats]) -> Findings {
    let mut findings = Findings::new();

    for member in stats {
        findings.insert_opt(classify_finding(
            &format!("mgr_trx_certify_{}", member.member_id),
            member.certification_queue as f64,
            CLUSTER_QUEUE_DEPTH,
            |_| {
                format!(
                    "Member {} has {} transactions waiting for certification",
                    member.address(),
                    member.certification_queue
                )
            },
        ));
        findings.insert_opt(classify_finding(
            &format!("mgr_relaylog_apply_{}", member.member_id),
            member.applier_queue as f64,
            CLUSTER_QUEUE_DEPTH,
            |_| {
                format!(
                    "Member {} has {} transactions waiting in the applier queue",
                    member.address(),
                    member.applier_queue
                )
            },
        ));
    }

    findings
}

async fn fetch_members(
    executor: &mut dyn QueryExecutor,
) -> Result<Vec<ClusterMember>, DiagnosticError> {
    let rows = executor.fetch_rows(MEMBERS_QUERY).await?;
    Ok(rows.iter().map(ClusterMember::from_row).collect())
}

async fn fetch_queue_stats(
    executor: &mut dyn QueryExecutor,
) -> Result<Vec<MemberQueueStats>, DiagnosticError> {
    let rows = executor.fetch_rows(MEMBER_STATS_QUERY).await?;
    Ok(rows.iter().map(MemberQueueStats::from_row).collect())
}

/// Membership and queue checks; a failing sub-check is recorded and the other still runs
pub async fn check(executor: &mut dyn QueryExecutor) -> Findings {
    let mut findings = Findings::new();

    match fetch_members(executor).await {
        Ok(members) if members.is_empty() => return analyze_membership(&members),
        Ok(members) => findings.merge(analyze_membership(&members)),
        Err(e) => {
            tracing::warn!("Group membership check failed: {}", e);
            findings.insert(Finding::check_failed("mgr_status", &e));
        }
    }

    match fetch_queue_stats(executor).await {
        Ok(stats) => findings.merge(analyze_queues(&stats)),
        Err(e) => {
            tracing::warn!("Group queue check failed: {}", e);
            findings.insert(Finding::check_failed("mgr_queue", &e));
        }
    }

    findings
}
