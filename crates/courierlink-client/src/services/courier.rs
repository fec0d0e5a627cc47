use tokio::sync::broadcast;

use courierlink_core::protocol::payload::OrderOffer;

use crate::connection::ConnectionManager;

const OFFER_CAPACITY: usize = 16;

/// Courier-side actions: receive offers, accept or decline them.
#[derive(Clone)]
pub struct CourierService {
    link: ConnectionManager,
    courier_id: i64,
    offers: broadcast::Sender<OrderOffer>,
}

impl CourierService {
    pub fn new(link: ConnectionManager, courier_id: i64) -> Self {
        let (offers, _) = broadcast::channel(OFFER_CAPACITY);
        Self {
            link,
            courier_id,
            offers,
        }
    }

    pub fn courier_id(&self) -> i64 {
        self.courier_id
    }

    /// Claim the offer callback slot.
    pub fn attach(&self) {
        let offers = self.offers.clone();
        self.link.on_order_offered(move |offer| {
            tracing::info!(expires_in = offer.expires_in, "order offered");
            let _ = offers.send(offer);
        });
    }

    pub fn offers(&self) -> broadcast::Receiver<OrderOffer> {
        self.offers.subscribe()
    }

    pub fn accept(&self, order_id: &str) {
        self.link.accept_order(order_id, self.courier_id);
    }

    pub fn decline(&self, order_id: &str) {
        self.link.decline_order(order_id, self.courier_id);
    }
}
