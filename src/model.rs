use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// A persisted order: identifier plus its opaque JSON payload.
///
/// The core never interprets `raw_ord` beyond what `CustomerOrder` validates
/// at ingest; downstream it is moved around as bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub oid: String,
    pub raw_ord: Bytes,
}

impl Order {
    pub fn new(oid: impl Into<String>, raw_ord: Bytes) -> Self {
        Self {
            oid: oid.into(),
            raw_ord,
        }
    }
}

/// A batch of orders, as produced by a restore-cache pass.
#[derive(Debug, Clone, Default)]
pub struct Orders {
    pub items: Vec<Order>,
}

/// A message handed from the stream consumer to the storage service.
#[derive(Debug, Clone)]
pub struct NatsMsg {
    pub msg_id: u64,
    pub order: Order,
}

/// Fill events flowing from storage to cache (see `storage::service`).
#[derive(Debug, Clone)]
pub enum CacheItem {
    AddOne(Order),
    AddMany(Orders),
}

/// The customer order payload. Required fields are validated on ingest;
/// everything else rides along as part of the JSON body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerOrder {
    pub order_uid: String,
    #[serde(default)]
    pub track_number: String,
    #[serde(default)]
    pub entry: String,
    pub delivery: Delivery,
    pub payment: Payment,
    pub items: Vec<Item>,
    #[serde(default)]
    pub locale: String,
    #[serde(default)]
    pub internal_signature: String,
    #[serde(default)]
    pub customer_id: String,
    #[serde(default)]
    pub delivery_service: String,
    #[serde(default)]
    pub shardkey: String,
    #[serde(default)]
    pub sm_id: i64,
    #[serde(default)]
    pub date_created: String,
    #[serde(default)]
    pub oof_shard: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delivery {
    pub name: String,
    pub phone: String,
    pub zip: String,
    pub city: String,
    pub address: String,
    pub region: String,
    pub email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub transaction: String,
    #[serde(default)]
    pub request_id: String,
    pub currency: String,
    pub provider: String,
    pub amount: i64,
    pub payment_dt: i64,
    pub bank: String,
    pub delivery_cost: i64,
    pub goods_total: i64,
    #[serde(default)]
    pub custom_fee: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub chrt_id: i64,
    #[serde(default)]
    pub track_number: String,
    pub price: i64,
    pub rid: String,
    pub name: String,
    #[serde(default)]
    pub sale: i64,
    #[serde(default)]
    pub size: String,
    pub total_price: i64,
    pub nm_id: i64,
    pub brand: String,
    #[serde(default)]
    pub status: i64,
}

impl CustomerOrder {
    /// Required-field validation: non-empty `order_uid`/`track_number`, a
    /// non-empty `items` list. The nested structs deserializing
    /// successfully already guarantees `delivery`/`payment` are present.
    pub fn validate(&self) -> Result<(), String> {
        if self.order_uid.trim().is_empty() {
            return Err("order_uid must not be empty".into());
        }
        if self.track_number.trim().is_empty() {
            return Err("track_number must not be empty".into());
        }
        if self.items.is_empty() {
            return Err("items must not be empty".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> CustomerOrder {
        CustomerOrder {
            order_uid: "A1".into(),
            track_number: "TRACK1".into(),
            entry: "WBIL".into(),
            delivery: Delivery {
                name: "Test".into(),
                phone: "+0".into(),
                zip: "0".into(),
                city: "City".into(),
                address: "Addr".into(),
                region: "Region".into(),
                email: "a@b.c".into(),
            },
            payment: Payment {
                transaction: "A1".into(),
                request_id: "".into(),
                currency: "USD".into(),
                provider: "wbpay".into(),
                amount: 1817,
                payment_dt: 1637907727,
                bank: "alpha".into(),
                delivery_cost: 1500,
                goods_total: 317,
                custom_fee: 0,
            },
            items: vec![Item {
                chrt_id: 1,
                track_number: "TRACK1".into(),
                price: 453,
                rid: "rid1".into(),
                name: "item".into(),
                sale: 30,
                size: "0".into(),
                total_price: 317,
                nm_id: 2389212,
                brand: "Brand".into(),
                status: 202,
            }],
            locale: "en".into(),
            internal_signature: "".into(),
            customer_id: "test".into(),
            delivery_service: "meest".into(),
            shardkey: "9".into(),
            sm_id: 99,
            date_created: "2021-11-26T06:22:19Z".into(),
            oof_shard: "1".into(),
        }
    }

    #[test]
    fn accepts_well_formed_order() {
        assert!(sample().validate().is_ok());
    }

    #[test]
    fn rejects_empty_order_uid() {
        let mut o = sample();
        o.order_uid.clear();
        assert!(o.validate().is_err());
    }

    #[test]
    fn rejects_empty_items() {
        let mut o = sample();
        o.items.clear();
        assert!(o.validate().is_err());
    }
}
