use std::{net::SocketAddr, sync::Arc};

use async_trait::async_trait;
use relayd_aliases::AliasTable;
use relayd_common::{envelope::Envelope, internal, tracing};
use relayd_smtp::{SmtpTransactionHandler, TransactionError};

use crate::{dns::MxResolver, transaction::Deliver};

/// Rewrites each recipient through the alias table and forwards the message
/// to the destination's mail exchange.
///
/// Recipients without an alias, or whose destination domain has no MX, are
/// dropped silently. The first delivery failure aborts the rest of the
/// envelope.
///
/// Every recipient of one envelope is routed through the same snapshot of
/// the alias table, even if a refresh lands halfway through.
pub struct Relay {
    table: Arc<AliasTable>,
    resolver: Arc<dyn MxResolver>,
    delivery: Arc<dyn Deliver>,
}

impl Relay {
    #[must_use]
    pub fn new(
        table: Arc<AliasTable>,
        resolver: Arc<dyn MxResolver>,
        delivery: Arc<dyn Deliver>,
    ) -> Self {
        Self {
            table,
            resolver,
            delivery,
        }
    }
}

#[async_trait]
impl SmtpTransactionHandler for Relay {
    #[tracing::instrument(level = "debug", skip_all, fields(%peer, sender = envelope.sender()))]
    async fn handle_message(
        &self,
        peer: SocketAddr,
        envelope: &Envelope,
    ) -> Result<(), TransactionError> {
        let snapshot = self.table.snapshot();

        for recipient in envelope.recipients() {
            let Some(alias) = snapshot.get(recipient) else {
                internal!(level = DEBUG, "No alias for {recipient}, skipping");
                continue;
            };

            let destination = alias.destination();
            let Some(domain) = alias.domain() else {
                internal!(level = DEBUG, "Alias for {recipient} has no domain, skipping");
                continue;
            };

            let Some(host) = self.resolver.resolve_mx(domain).await else {
                internal!(level = DEBUG, "No mail exchange for {domain}, skipping {recipient}");
                continue;
            };

            internal!(
                level = INFO,
                "received email for {recipient} and forwarding to {destination} via {host}"
            );

            if let Err(err) = self
                .delivery
                .deliver(&host, envelope.sender(), destination, envelope.data())
                .await
            {
                let class = if err.is_permanent() {
                    "permanent"
                } else {
                    "transient"
                };
                internal!(
                    level = ERROR,
                    "Relaying {recipient} to {destination} via {host} failed ({class}): {err}"
                );
                return Err(TransactionError::new(format!(
                    "relay of {recipient} via {host} failed"
                )));
            }
        }

        Ok(())
    }
}
