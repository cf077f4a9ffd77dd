//! Queue identities.
//!
//! Pending queues are partitioned by (provisionerId, workerType,
//! priority) so the dispatch side can drain priorities strictly in
//! order; the three system queues are global.

use crate::constants::Priority;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueueName {
    /// `pending/<provisionerId>/<workerType>/<priority>`
    Pending {
        provisioner_id: String,
        worker_type: String,
        priority: Priority,
    },
    /// Claim-expiration messages, visible at `takenUntil`.
    ClaimExpiration,
    /// Deadline messages, visible at the task deadline.
    Deadline,
    /// Task resolutions awaiting dependency fan-out.
    Resolved,
}

impl QueueName {
    pub fn pending(provisioner_id: &str, worker_type: &str, priority: Priority) -> Self {
        Self::Pending {
            provisioner_id: provisioner_id.to_string(),
            worker_type: worker_type.to_string(),
            priority,
        }
    }

    /// Logical name, slash-separated.
    pub fn name(&self) -> String {
        match self {
            Self::Pending {
                provisioner_id,
                worker_type,
                priority,
            } => format!("pending/{provisioner_id}/{worker_type}/{priority}"),
            Self::ClaimExpiration => "claim-expiration".to_string(),
            Self::Deadline => "deadline".to_string(),
            Self::Resolved => "resolved".to_string(),
        }
    }

    /// Physical name usable as a Postgres identifier: lowercase, with
    /// `/` and `-` mapped to `_`.
    pub fn pg_name(&self) -> String {
        self.name()
            .chars()
            .map(|c| match c {
                '/' | '-' => '_',
                c => c.to_ascii_lowercase(),
            })
            .collect()
    }

    /// The seven pending queues for one (provisioner, workerType), in
    /// strict dispatch order.
    pub fn pending_buckets(provisioner_id: &str, worker_type: &str) -> Vec<QueueName> {
        Priority::ALL
            .iter()
            .map(|priority| QueueName::pending(provisioner_id, worker_type, *priority))
            .collect()
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_name_encodes_partition() {
        let queue = QueueName::pending("aws", "builder", Priority::VeryHigh);
        assert_eq!(queue.name(), "pending/aws/builder/very-high");
        assert_eq!(queue.pg_name(), "pending_aws_builder_very_high");
    }

    #[test]
    fn buckets_follow_dispatch_order() {
        let buckets = QueueName::pending_buckets("p", "wt");
        assert_eq!(buckets.len(), 7);
        assert_eq!(buckets[0].name(), "pending/p/wt/highest");
        assert_eq!(buckets[6].name(), "pending/p/wt/lowest");
    }
}
