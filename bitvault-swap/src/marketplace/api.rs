//! Marketplace HTTP surface
//!
//! Request and response bodies of the venue endpoints, and the
//! [`MarketplaceApi`] trait a transport implements. Field names follow the
//! venues' camelCase wire format.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{SwapError, SwapResult};
use crate::types::{AssetType, Venue};

/// Envelope every aggregated venue endpoint answers with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            status_code: 200,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(status_code: u16, error: impl Into<String>) -> Self {
        Self {
            status_code,
            data: None,
            error: Some(error.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status_code == 200
    }

    /// Payload of a 200 response
    ///
    /// A non-200 status becomes `"{what}: {error}"`; a 200 without a body is
    /// reported the same way.
    pub fn into_data(self, venue: Venue, what: &str) -> SwapResult<T> {
        if !self.is_ok() {
            let error = self.error.unwrap_or_else(|| format!("status {}", self.status_code));
            return Err(SwapError::venue(venue, format!("{}: {}", what, error)));
        }
        self.data
            .ok_or_else(|| SwapError::venue(venue, format!("{}: empty response", what)))
    }
}

/// A value sent either alone or as a list, depending on single or batch offers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T: Clone> OneOrMany<T> {
    pub fn to_vec(&self) -> Vec<T> {
        match self {
            OneOrMany::One(value) => vec![value.clone()],
            OneOrMany::Many(values) => values.clone(),
        }
    }
}

/// One order of a seller-PSBT request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuyOrder {
    pub order_id: String,
    pub price: u64,
    pub amount: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inscription_id: Option<String>,
    pub fee_rate: rust_decimal::Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetSellerPsbtRequest {
    pub marketplace_type: Venue,
    pub asset_type: AssetType,
    pub buyer_address: String,
    pub buyer_public_key: String,
    pub fee_rate: rust_decimal::Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ticker: Option<String>,
    pub receive_address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receive_public_key: Option<String>,
    pub orders: Vec<BuyOrder>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SellerPsbt {
    pub psbt: String,
    /// Venue-specific fields echoed back on submit
    #[serde(default)]
    pub additional_data: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitBuyerPsbtRequest {
    pub marketplace_type: Venue,
    pub asset_type: AssetType,
    pub buyer_address: String,
    pub buyer_public_key: String,
    pub receive_address: String,
    pub psbt: String,
    pub orders: Vec<BuyOrder>,
    #[serde(flatten)]
    pub additional_data: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmittedPurchase {
    #[serde(default)]
    pub txid: Option<String>,
}

/// One asset offered in a listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inscription_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_price: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_price: Option<u64>,
    pub seller_receive_address: String,
    /// Txid of the UTXO holding the asset
    pub utxo: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetListingPsbtRequest {
    pub marketplace_type: Venue,
    pub asset_type: AssetType,
    pub seller_address: String,
    pub seller_public_key: String,
    pub listings: Vec<ListingInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingPsbt {
    pub psbt: String,
    #[serde(default)]
    pub additional_data: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitListingPsbtRequest {
    pub marketplace_type: Venue,
    pub asset_type: AssetType,
    pub seller_address: String,
    pub seller_public_key: String,
    pub signed_psbt: String,
    pub order_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitListingResponse {
    pub success: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnisatBidRequest {
    pub address: String,
    pub auction_id: OneOrMany<String>,
    pub bid_price: OneOrMany<u64>,
    pub pub_key: String,
    pub receive_address: String,
    /// Ownership proof, sent when paying from a different address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    pub feerate: rust_decimal::Decimal,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnisatBidResponse {
    #[serde(default)]
    pub psbt_bid: Option<String>,
    /// Setup PSBT creating the padding outputs, when the venue wants one
    #[serde(default)]
    pub psbt_dummy: Option<String>,
    #[serde(default)]
    pub bid_id: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnisatSignedBid {
    pub psbt_bid: String,
    pub auction_id: OneOrMany<String>,
    pub bid_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnisatSubmitResponse {
    #[serde(default)]
    pub txid: Option<String>,
}

/// Seller side of an OKX order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OkxSellerPsbt {
    /// Seller-signed PSBT, hex or base64
    pub seller_psbt: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OkxSubmission {
    #[serde(rename_all = "camelCase")]
    Rune {
        from_address: String,
        psbt: String,
        order_id: String,
    },
    #[serde(rename_all = "camelCase")]
    Inscription {
        ticker: String,
        price: u64,
        amount: u64,
        from_address: String,
        to_address: String,
        inscription_id: String,
        buyer_psbt: String,
        order_id: String,
        brc20: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrdinalsWalletBidRequest {
    pub address: String,
    pub public_key: String,
    pub fee_rate: rust_decimal::Decimal,
    pub receive_address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inscriptions: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outpoints: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrdinalsWalletOfferPsbt {
    #[serde(default)]
    pub setup: Option<String>,
    pub purchase: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrdinalsWalletSubmission {
    pub psbt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setup_psbt: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrdinalsWalletSubmitResult {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub purchase: Option<String>,
}

/// Marketplace endpoints
///
/// Transports return non-200 answers as [`ApiResponse`] values rather than
/// errors; only transport failures surface as `Err`.
#[async_trait]
pub trait MarketplaceApi: Send + Sync {
    async fn get_seller_psbt(&self, request: &GetSellerPsbtRequest) -> SwapResult<ApiResponse<SellerPsbt>>;

    async fn submit_buyer_psbt(
        &self,
        request: &SubmitBuyerPsbtRequest,
    ) -> SwapResult<ApiResponse<SubmittedPurchase>>;

    async fn get_listing_psbt(&self, request: &GetListingPsbtRequest) -> SwapResult<ApiResponse<ListingPsbt>>;

    async fn submit_listing_psbt(
        &self,
        request: &SubmitListingPsbtRequest,
    ) -> SwapResult<ApiResponse<SubmitListingResponse>>;

    async fn unisat_init_bid(
        &self,
        asset_type: AssetType,
        request: &UnisatBidRequest,
    ) -> SwapResult<UnisatBidResponse>;

    async fn unisat_submit_bid(
        &self,
        asset_type: AssetType,
        bid: &UnisatSignedBid,
    ) -> SwapResult<UnisatSubmitResponse>;

    async fn okx_offer_psbt(&self, offer_id: &str, is_rune: bool) -> SwapResult<OkxSellerPsbt>;

    /// Raw response: 200 with `data` holding the purchase txid on success
    async fn okx_submit_bid(&self, submission: &OkxSubmission) -> SwapResult<ApiResponse<String>>;

    async fn ordinals_wallet_offer_psbt(
        &self,
        asset_type: AssetType,
        request: &OrdinalsWalletBidRequest,
    ) -> SwapResult<ApiResponse<OrdinalsWalletOfferPsbt>>;

    async fn ordinals_wallet_submit(
        &self,
        asset_type: AssetType,
        submission: &OrdinalsWalletSubmission,
    ) -> SwapResult<ApiResponse<OrdinalsWalletSubmitResult>>;
}
