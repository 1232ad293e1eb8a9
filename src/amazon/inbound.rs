//! FBA inbound: shipment plans, shipment creation and box labels for stock
//! the seller sends into Amazon warehouses.

use crate::{
    error::SyncError,
    executor::{ApiRequest, RequestExecutor, ResponseBody},
    models::{ChannelAccount, InboundLabels, InboundShipment, InboundShipmentItem},
    store::Store,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use serde_with::skip_serializing_none;
use tracing::{info, warn};
use urlencoding::encode;
use uuid::Uuid;

const DEFAULT_LABEL_PREP: &str = "SELLER_LABEL";
const DEFAULT_PAGE_TYPE: &str = "PackageLabel_Letter";

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ShipFromAddress {
    #[serde(rename = "Name", alias = "name")]
    pub name: String,
    #[serde(rename = "AddressLine1", alias = "addressLine1")]
    pub address_line1: String,
    #[serde(rename = "AddressLine2", alias = "addressLine2")]
    pub address_line2: Option<String>,
    #[serde(rename = "City", alias = "city")]
    pub city: String,
    #[serde(rename = "StateOrProvinceCode", alias = "stateOrProvinceCode")]
    pub state_or_province_code: String,
    #[serde(rename = "PostalCode", alias = "postalCode")]
    pub postal_code: String,
    #[serde(rename = "CountryCode", alias = "countryCode")]
    pub country_code: String,
    #[serde(rename = "DistrictOrCounty", alias = "districtOrCounty")]
    pub district_or_county: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanItem {
    pub seller_sku: String,
    pub quantity: u32,
    pub asin: Option<String>,
    pub condition: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundPlanRequest {
    pub ship_from_address: ShipFromAddress,
    pub label_prep_preference: Option<String>,
    pub items: Vec<PlanItem>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShipmentItem {
    pub seller_sku: String,
    pub quantity_shipped: u32,
    pub quantity_in_case: Option<u32>,
    pub prep_details_list: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundShipmentRequest {
    pub shipment_id: String,
    pub destination_fulfillment_center_id: String,
    pub ship_from_address: ShipFromAddress,
    pub label_prep_preference: Option<String>,
    pub shipment_name: Option<String>,
    pub items: Vec<ShipmentItem>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelRequest {
    pub page_type: Option<String>,
    pub label_type: Option<String>,
    pub number_of_packages: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LabelsOutcome {
    pub labels: InboundLabels,
    pub response: ResponseBody,
}

/// Asks Amazon which fulfillment centers should receive the listed units.
pub async fn create_inbound_plan(
    executor: &RequestExecutor,
    account: &ChannelAccount,
    request: &InboundPlanRequest,
) -> Result<ResponseBody, SyncError> {
    if request.items.is_empty() {
        return Err(SyncError::Configuration("inbound plan has no items".into()));
    }
    let items: Vec<Value> = request
        .items
        .iter()
        .map(|item| {
            json!({
                "SellerSKU": item.seller_sku,
                "ASIN": item.asin,
                "Condition": item.condition.as_deref().unwrap_or("NewItem"),
                "Quantity": item.quantity,
            })
        })
        .collect();
    let body = json!({
        "ShipFromAddress": request.ship_from_address,
        "LabelPrepPreference": request
            .label_prep_preference
            .as_deref()
            .unwrap_or(DEFAULT_LABEL_PREP),
        "InboundShipmentPlanRequestItems": items,
    });

    let response = executor
        .execute(account, ApiRequest::post("/fba/inbound/v0/plans").json(body))
        .await?;
    info!(
        target: "channel_sync.amazon",
        account_id = %account.id,
        items = request.items.len(),
        "inbound plan created"
    );
    Ok(response)
}

/// Creates the shipment Amazon planned and keeps a record of it. Creating the
/// same `shipment_id` again updates that record.
pub async fn create_inbound_shipment(
    executor: &RequestExecutor,
    store: &Store,
    account: &ChannelAccount,
    request: &InboundShipmentRequest,
) -> Result<InboundShipment, SyncError> {
    let shipment_id = request.shipment_id.trim();
    if shipment_id.is_empty() || request.destination_fulfillment_center_id.trim().is_empty() {
        return Err(SyncError::Configuration(
            "shipmentId and destinationFulfillmentCenterId are required".into(),
        ));
    }
    if request.items.is_empty() {
        return Err(SyncError::Configuration("inbound shipment has no items".into()));
    }
    let label_prep = request
        .label_prep_preference
        .clone()
        .unwrap_or_else(|| DEFAULT_LABEL_PREP.to_string());
    let shipment_name = request
        .shipment_name
        .clone()
        .unwrap_or_else(|| format!("Inbound {shipment_id}"));

    let items: Vec<Value> = request
        .items
        .iter()
        .map(|item| {
            json!({
                "SellerSKU": item.seller_sku,
                "QuantityShipped": item.quantity_shipped,
                "QuantityInCase": item.quantity_in_case,
                "PrepDetailsList": item.prep_details_list,
            })
        })
        .collect();
    let body = json!({
        "ShipmentId": shipment_id,
        "InboundShipmentHeader": {
            "ShipmentName": shipment_name,
            "ShipFromAddress": request.ship_from_address,
            "DestinationFulfillmentCenterId": request.destination_fulfillment_center_id,
            "LabelPrepPreference": label_prep,
            "ShipmentStatus": "WORKING",
        },
        "InboundShipmentItems": items,
    });

    let response = executor
        .execute(
            account,
            ApiRequest::post(format!("/fba/inbound/v0/shipments/{}", encode(shipment_id)))
                .json(body),
        )
        .await?;

    let now = Utc::now();
    let shipment = store
        .upsert_inbound_shipment(InboundShipment {
            id: Uuid::new_v4(),
            seller_id: account.seller_id,
            account_id: account.id,
            marketplace_id: account.marketplace_ids.first().cloned(),
            shipment_id: shipment_id.to_string(),
            destination_fulfillment_center_id: request.destination_fulfillment_center_id.clone(),
            label_prep_preference: label_prep,
            shipment_name,
            items: request
                .items
                .iter()
                .map(|item| InboundShipmentItem {
                    seller_sku: item.seller_sku.clone(),
                    quantity_shipped: item.quantity_shipped,
                    quantity_in_case: item.quantity_in_case,
                    prep_details: item.prep_details_list.clone(),
                })
                .collect(),
            labels: None,
            raw_shipment: response.clone().into_json(),
            created_at: now,
            updated_at: now,
        })
        .await;
    info!(
        target: "channel_sync.amazon",
        account_id = %account.id,
        shipment_id,
        "inbound shipment created"
    );
    Ok(shipment)
}

/// Downloads box labels for a shipment and stores where the document lives.
pub async fn fetch_inbound_labels(
    executor: &RequestExecutor,
    store: &Store,
    account: &ChannelAccount,
    shipment_id: &str,
    request: &LabelRequest,
) -> Result<LabelsOutcome, SyncError> {
    let page_type = request
        .page_type
        .clone()
        .unwrap_or_else(|| DEFAULT_PAGE_TYPE.to_string());
    let mut call = ApiRequest::get(format!(
        "/fba/inbound/v0/shipments/{}/labels",
        encode(shipment_id)
    ))
    .query("PageType", page_type.clone());
    if let Some(label_type) = &request.label_type {
        call = call.query("LabelType", label_type.clone());
    }
    if let Some(packages) = request.number_of_packages {
        call = call.query("NumberOfPackages", packages.to_string());
    }
    let response = executor.execute(account, call).await?;

    let labels = InboundLabels {
        url: response.as_json().and_then(label_url),
        page_type,
        label_type: request.label_type.clone(),
        fetched_at: Utc::now(),
    };
    if store
        .record_inbound_labels(account.id, shipment_id, labels.clone())
        .await
        .is_none()
    {
        warn!(
            target: "channel_sync.amazon",
            account_id = %account.id,
            shipment_id,
            "labels fetched for a shipment this service did not create"
        );
    }
    info!(
        target: "channel_sync.amazon",
        account_id = %account.id,
        shipment_id,
        has_url = labels.url.is_some(),
        "inbound labels fetched"
    );
    Ok(LabelsOutcome { labels, response })
}

fn label_url(body: &Value) -> Option<String> {
    let payload = body.get("payload");
    payload
        .and_then(|p| p.pointer("/TransportDocument/PdfDocument"))
        .or_else(|| payload.and_then(|p| p.get("DownloadURL")))
        .or_else(|| body.get("DownloadURL"))
        .and_then(Value::as_str)
        .filter(|url| !url.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::Marketplace,
        testing::{connected_account, harness, serve},
    };
    use axum::{
        Json, Router,
        extract::{Query, State},
        routing::{get, post},
    };
    use std::{
        collections::HashMap,
        sync::{Arc, Mutex},
    };

    fn ship_from() -> ShipFromAddress {
        ShipFromAddress {
            name: "Warehouse".into(),
            address_line1: "1 Dock Rd".into(),
            city: "Seattle".into(),
            state_or_province_code: "WA".into(),
            postal_code: "98101".into(),
            country_code: "US".into(),
            ..ShipFromAddress::default()
        }
    }

    fn shipment_request() -> InboundShipmentRequest {
        InboundShipmentRequest {
            shipment_id: "FBA15DJ".into(),
            destination_fulfillment_center_id: "SEA8".into(),
            ship_from_address: ship_from(),
            label_prep_preference: None,
            shipment_name: None,
            items: vec![ShipmentItem {
                seller_sku: "MUG-01".into(),
                quantity_shipped: 24,
                quantity_in_case: Some(12),
                prep_details_list: None,
            }],
        }
    }

    #[tokio::test]
    async fn plan_uses_amazon_field_names() {
        let seen: Arc<Mutex<Vec<Value>>> = Arc::default();
        let router = Router::new()
            .route(
                "/fba/inbound/v0/plans",
                post(
                    |State(seen): State<Arc<Mutex<Vec<Value>>>>, Json(body): Json<Value>| async move {
                        seen.lock().unwrap().push(body);
                        Json(json!({"payload": {"InboundShipmentPlans": []}}))
                    },
                ),
            )
            .with_state(seen.clone());
        let base = serve(router).await;
        let h = harness(&base);
        let account = connected_account(&h.store, Marketplace::Amazon, "A1SELLER").await;

        let request = InboundPlanRequest {
            ship_from_address: ship_from(),
            label_prep_preference: None,
            items: vec![PlanItem {
                seller_sku: "MUG-01".into(),
                quantity: 24,
                asin: None,
                condition: None,
            }],
        };
        create_inbound_plan(&h.executor, &account, &request).await.unwrap();

        let body = seen.lock().unwrap()[0].clone();
        assert_eq!(body["LabelPrepPreference"], "SELLER_LABEL");
        assert_eq!(body["ShipFromAddress"]["StateOrProvinceCode"], "WA");
        assert!(body["ShipFromAddress"].get("AddressLine2").is_none());
        let item = &body["InboundShipmentPlanRequestItems"][0];
        assert_eq!(item["SellerSKU"], "MUG-01");
        assert_eq!(item["Condition"], "NewItem");
        assert_eq!(item["Quantity"], 24);
    }

    #[tokio::test]
    async fn shipment_is_recorded_and_labels_attach_to_it() {
        let router = Router::new()
            .route(
                "/fba/inbound/v0/shipments/FBA15DJ",
                post(|Json(body): Json<Value>| async move {
                    assert_eq!(body["InboundShipmentHeader"]["ShipmentName"], "Inbound FBA15DJ");
                    assert_eq!(body["InboundShipmentHeader"]["ShipmentStatus"], "WORKING");
                    assert_eq!(body["InboundShipmentItems"][0]["QuantityInCase"], 12);
                    Json(json!({"payload": {"ShipmentId": "FBA15DJ"}}))
                }),
            )
            .route(
                "/fba/inbound/v0/shipments/FBA15DJ/labels",
                get(|Query(query): Query<HashMap<String, String>>| async move {
                    assert_eq!(query.get("PageType").map(String::as_str), Some("PackageLabel_Letter"));
                    assert_eq!(query.get("NumberOfPackages").map(String::as_str), Some("2"));
                    Json(json!({"payload": {"DownloadURL": "https://labels.example.com/FBA15DJ.pdf"}}))
                }),
            );
        let base = serve(router).await;
        let h = harness(&base);
        let account = connected_account(&h.store, Marketplace::Amazon, "A1SELLER").await;

        let shipment = create_inbound_shipment(&h.executor, &h.store, &account, &shipment_request())
            .await
            .unwrap();
        assert_eq!(shipment.marketplace_id.as_deref(), Some("ATVPDKIKX0DER"));
        assert_eq!(shipment.raw_shipment["payload"]["ShipmentId"], "FBA15DJ");

        let again = create_inbound_shipment(&h.executor, &h.store, &account, &shipment_request())
            .await
            .unwrap();
        assert_eq!(again.id, shipment.id);

        let outcome = fetch_inbound_labels(
            &h.executor,
            &h.store,
            &account,
            "FBA15DJ",
            &LabelRequest {
                number_of_packages: Some(2),
                ..LabelRequest::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(
            outcome.labels.url.as_deref(),
            Some("https://labels.example.com/FBA15DJ.pdf")
        );
        let stored = h.store.get_inbound_shipment(account.id, "FBA15DJ").await.unwrap();
        assert_eq!(stored.labels, Some(outcome.labels));
    }

    #[tokio::test]
    async fn shipment_without_items_is_refused_locally() {
        let h = harness("http://127.0.0.1:9");
        let account = connected_account(&h.store, Marketplace::Amazon, "A1SELLER").await;
        let mut request = shipment_request();
        request.items.clear();
        let err = create_inbound_shipment(&h.executor, &h.store, &account, &request)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Configuration(_)));
        assert!(h.store.get_inbound_shipment(account.id, "FBA15DJ").await.is_none());
    }

    #[test]
    fn label_url_prefers_transport_document() {
        let body = json!({"payload": {
            "TransportDocument": {"PdfDocument": "https://a"},
            "DownloadURL": "https://b"
        }});
        assert_eq!(label_url(&body).as_deref(), Some("https://a"));
        assert_eq!(label_url(&json!({"DownloadURL": "https://c"})).as_deref(), Some("https://c"));
        assert_eq!(label_url(&json!({"payload": {}})), None);
    }
}
