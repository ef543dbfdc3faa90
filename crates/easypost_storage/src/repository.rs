use std::collections::BTreeMap;
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use easypost_contract::{
    Address, Carrier, Label, LabelArtifact, LabelFormat, NewAddress, NewLabel, NewParcel,
    NewShipment, Parcel, ParcelShape, PredefinedPackage, RefundStatus, Shipment,
    TrackingHistoryEntry, TrackingStatus,
};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{FromRow, SqlitePool};
use tracing::{debug, info};
use uuid::Uuid;

const SCHEMA_SQL: &str = include_str!("sql/schema.sql");

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub sqlite_path: String,
    pub max_connections: u32,
}

impl StorageConfig {
    pub fn new(sqlite_path: impl Into<String>) -> Self {
        Self {
            sqlite_path: sqlite_path.into(),
            max_connections: 5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EasypostStorage {
    pool: SqlitePool,
}

#[derive(Debug, FromRow)]
struct AddressRow {
    address_id: String,
    name: String,
    street1: String,
    street2: String,
    city: String,
    state: String,
    zip_code: String,
    country: String,
    phone: String,
    email: String,
    verified: bool,
    created_at: String,
}

#[derive(Debug, FromRow)]
struct ParcelRow {
    parcel_id: String,
    shipment_id: Option<String>,
    provider_id: Option<String>,
    predefined_package: Option<String>,
    length: Option<f64>,
    width: Option<f64>,
    height: Option<f64>,
    weight: f64,
    created_at: String,
}

#[derive(Debug, FromRow)]
struct ShipmentRow {
    shipment_id: String,
    to_address_id: String,
    from_address_id: String,
    is_return: bool,
    refund_status: String,
    provider_id: Option<String>,
    tracking_code: Option<String>,
    tracking_status: String,
    carrier: String,
    service: Option<String>,
    rate: Option<String>,
    created_at: String,
}

#[derive(Debug, FromRow)]
struct LabelRow {
    label_id: String,
    shipment_id: String,
    provider_id: Option<String>,
    label_url: Option<String>,
    created_at: String,
}

#[derive(Debug, FromRow)]
struct ArtifactRow {
    format: String,
    url: String,
    refreshed_at: String,
}

#[derive(Debug, FromRow)]
struct HistoryRow {
    history_id: i64,
    shipment_id: String,
    status: String,
    message: String,
    update_time: String,
    created_at: String,
}

const ADDRESS_COLUMNS: &str = "address_id, name, street1, street2, city, state, zip_code, country, phone, email, verified, created_at";
const PARCEL_COLUMNS: &str = "parcel_id, shipment_id, provider_id, predefined_package, length, width, height, weight, created_at";
const SHIPMENT_COLUMNS: &str = "shipment_id, to_address_id, from_address_id, is_return, refund_status, provider_id, tracking_code, tracking_status, carrier, service, rate, created_at";
const HISTORY_COLUMNS: &str = "history_id, shipment_id, status, message, update_time, created_at";

impl EasypostStorage {
    pub async fn connect(config: &StorageConfig) -> Result<Self> {
        let uri = normalize_sqlite_uri(&config.sqlite_path);
        let options = SqliteConnectOptions::from_str(&uri)
            .with_context(|| format!("invalid sqlite URI: {}", uri))?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .context("failed to connect sqlite pool")?;

        let storage = Self { pool };
        storage.migrate().await?;
        Ok(storage)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<()> {
        for statement in SCHEMA_SQL.split(';') {
            let sql = statement.trim();
            if sql.is_empty() {
                continue;
            }
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .with_context(|| format!("migration failed for statement: {sql}"))?;
        }
        info!("easypost sqlite schema ready");
        Ok(())
    }

    pub async fn insert_address(&self, address: NewAddress) -> Result<Address> {
        let address_id = Uuid::now_v7().to_string();
        sqlx::query(
            "INSERT INTO addresses(address_id, name, street1, street2, city, state, zip_code, country, phone, email, verified, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?)",
        )
        .bind(&address_id)
        .bind(&address.name)
        .bind(&address.street1)
        .bind(&address.street2)
        .bind(&address.city)
        .bind(&address.state)
        .bind(&address.zip_code)
        .bind(&address.country)
        .bind(&address.phone)
        .bind(&address.email)
        .bind(timestamp(Utc::now()))
        .execute(&self.pool)
        .await
        .context("insert address")?;

        self.get_address(&address_id)
            .await?
            .context("address missing after insert")
    }

    pub async fn get_address(&self, address_id: &str) -> Result<Option<Address>> {
        let row = sqlx::query_as::<_, AddressRow>(&format!(
            "SELECT {ADDRESS_COLUMNS} FROM addresses WHERE address_id = ?"
        ))
        .bind(address_id)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("query address {address_id}"))?;
        row.map(Address::try_from).transpose()
    }

    /// Writes every mutable address column.
    pub async fn save_address(&self, address: &Address) -> Result<()> {
        sqlx::query(
            "UPDATE addresses SET name = ?, street1 = ?, street2 = ?, city = ?, state = ?, zip_code = ?, country = ?, phone = ?, email = ?, verified = ? WHERE address_id = ?",
        )
        .bind(&address.name)
        .bind(&address.street1)
        .bind(&address.street2)
        .bind(&address.city)
        .bind(&address.state)
        .bind(&address.zip_code)
        .bind(&address.country)
        .bind(&address.phone)
        .bind(&address.email)
        .bind(address.verified)
        .bind(&address.id)
        .execute(&self.pool)
        .await
        .with_context(|| format!("update address {}", address.id))?;
        Ok(())
    }

    pub async fn insert_parcel(
        &self,
        parcel: NewParcel,
        provider_id: Option<&str>,
    ) -> Result<Parcel> {
        let parcel_id = Uuid::now_v7().to_string();
        let (predefined, length, width, height) = match parcel.shape {
            ParcelShape::Predefined(package) => (Some(package.tag()), None, None, None),
            ParcelShape::Dimensions {
                length,
                width,
                height,
            } => (None, Some(length), Some(width), Some(height)),
        };

        sqlx::query(
            "INSERT INTO parcels(parcel_id, shipment_id, provider_id, predefined_package, length, width, height, weight, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&parcel_id)
        .bind(&parcel.shipment_id)
        .bind(provider_id)
        .bind(predefined)
        .bind(length)
        .bind(width)
        .bind(height)
        .bind(parcel.weight)
        .bind(timestamp(Utc::now()))
        .execute(&self.pool)
        .await
        .context("insert parcel")?;

        self.get_parcel(&parcel_id)
            .await?
            .context("parcel missing after insert")
    }

    pub async fn get_parcel(&self, parcel_id: &str) -> Result<Option<Parcel>> {
        let row = sqlx::query_as::<_, ParcelRow>(&format!(
            "SELECT {PARCEL_COLUMNS} FROM parcels WHERE parcel_id = ?"
        ))
        .bind(parcel_id)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("query parcel {parcel_id}"))?;
        row.map(Parcel::try_from).transpose()
    }

    pub async fn get_parcel_for_shipment(&self, shipment_id: &str) -> Result<Option<Parcel>> {
        let row = sqlx::query_as::<_, ParcelRow>(&format!(
            "SELECT {PARCEL_COLUMNS} FROM parcels WHERE shipment_id = ?"
        ))
        .bind(shipment_id)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("query parcel for shipment {shipment_id}"))?;
        row.map(Parcel::try_from).transpose()
    }

    pub async fn set_parcel_provider_id(&self, parcel_id: &str, provider_id: &str) -> Result<()> {
        sqlx::query("UPDATE parcels SET provider_id = ? WHERE parcel_id = ?")
            .bind(provider_id)
            .bind(parcel_id)
            .execute(&self.pool)
            .await
            .with_context(|| format!("update provider id for parcel {parcel_id}"))?;
        Ok(())
    }

    pub async fn insert_shipment(&self, shipment: NewShipment) -> Result<Shipment> {
        let shipment_id = Uuid::now_v7().to_string();
        sqlx::query(
            "INSERT INTO shipments(shipment_id, to_address_id, from_address_id, is_return, refund_status, tracking_status, carrier, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&shipment_id)
        .bind(&shipment.to_address_id)
        .bind(&shipment.from_address_id)
        .bind(shipment.is_return)
        .bind(RefundStatus::None.as_str())
        .bind(TrackingStatus::Unknown.as_str())
        .bind(Carrier::default().as_str())
        .bind(timestamp(Utc::now()))
        .execute(&self.pool)
        .await
        .context("insert shipment")?;

        self.get_shipment(&shipment_id)
            .await?
            .context("shipment missing after insert")
    }

    pub async fn get_shipment(&self, shipment_id: &str) -> Result<Option<Shipment>> {
        let row = sqlx::query_as::<_, ShipmentRow>(&format!(
            "SELECT {SHIPMENT_COLUMNS} FROM shipments WHERE shipment_id = ?"
        ))
        .bind(shipment_id)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("query shipment {shipment_id}"))?;
        row.map(Shipment::try_from).transpose()
    }

    /// Oldest local shipment carrying `provider_id`.
    pub async fn find_shipment_by_provider_id(&self, provider_id: &str) -> Result<Option<Shipment>> {
        let row = sqlx::query_as::<_, ShipmentRow>(&format!(
            "SELECT {SHIPMENT_COLUMNS} FROM shipments WHERE provider_id = ? ORDER BY created_at ASC LIMIT 1"
        ))
        .bind(provider_id)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("query shipment by provider id {provider_id}"))?;
        row.map(Shipment::try_from).transpose()
    }

    pub async fn list_shipments_by_refund_status(
        &self,
        status: RefundStatus,
    ) -> Result<Vec<Shipment>> {
        let rows = sqlx::query_as::<_, ShipmentRow>(&format!(
            "SELECT {SHIPMENT_COLUMNS} FROM shipments WHERE refund_status = ? ORDER BY created_at ASC"
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("query shipments with refund status {status}"))?;
        rows.into_iter().map(Shipment::try_from).collect()
    }

    pub async fn set_shipment_provider_id(&self, shipment_id: &str, provider_id: &str) -> Result<()> {
        sqlx::query("UPDATE shipments SET provider_id = ? WHERE shipment_id = ?")
            .bind(provider_id)
            .bind(shipment_id)
            .execute(&self.pool)
            .await
            .with_context(|| format!("update provider id for shipment {shipment_id}"))?;
        Ok(())
    }

    pub async fn update_tracking_code(
        &self,
        shipment_id: &str,
        tracking_code: Option<&str>,
    ) -> Result<()> {
        sqlx::query("UPDATE shipments SET tracking_code = ? WHERE shipment_id = ?")
            .bind(tracking_code)
            .bind(shipment_id)
            .execute(&self.pool)
            .await
            .with_context(|| format!("update tracking code for shipment {shipment_id}"))?;
        Ok(())
    }

    pub async fn update_tracking(
        &self,
        shipment_id: &str,
        tracking_code: Option<&str>,
        tracking_status: TrackingStatus,
    ) -> Result<()> {
        sqlx::query("UPDATE shipments SET tracking_code = ?, tracking_status = ? WHERE shipment_id = ?")
            .bind(tracking_code)
            .bind(tracking_status.as_str())
            .bind(shipment_id)
            .execute(&self.pool)
            .await
            .with_context(|| format!("update tracking for shipment {shipment_id}"))?;
        Ok(())
    }

    /// Persists only the rate, service and carrier columns.
    pub async fn update_purchase(&self, shipment: &Shipment) -> Result<()> {
        sqlx::query("UPDATE shipments SET rate = ?, service = ?, carrier = ? WHERE shipment_id = ?")
            .bind(shipment.rate.map(|rate| rate.to_string()))
            .bind(&shipment.service)
            .bind(shipment.carrier.as_str())
            .bind(&shipment.id)
            .execute(&self.pool)
            .await
            .with_context(|| format!("update purchase for shipment {}", shipment.id))?;
        Ok(())
    }

    pub async fn update_refund_status(&self, shipment_id: &str, status: RefundStatus) -> Result<()> {
        sqlx::query("UPDATE shipments SET refund_status = ? WHERE shipment_id = ?")
            .bind(status.as_str())
            .bind(shipment_id)
            .execute(&self.pool)
            .await
            .with_context(|| format!("update refund status for shipment {shipment_id}"))?;
        Ok(())
    }

    /// Inserts the label unless the shipment already has one.
    ///
    /// Returns the stored label and whether this call created it. The unique
    /// constraint on `labels.shipment_id` decides concurrent purchases.
    pub async fn insert_label_if_absent(&self, label: NewLabel) -> Result<(Label, bool)> {
        let label_id = Uuid::now_v7().to_string();
        let mut tx = self.pool.begin().await.context("begin label insert")?;

        let inserted = sqlx::query(
            "INSERT INTO labels(label_id, shipment_id, provider_id, label_url, created_at) VALUES (?, ?, ?, ?, ?) ON CONFLICT(shipment_id) DO NOTHING",
        )
        .bind(&label_id)
        .bind(&label.shipment_id)
        .bind(&label.provider_id)
        .bind(&label.label_url)
        .bind(timestamp(Utc::now()))
        .execute(&mut *tx)
        .await
        .with_context(|| format!("insert label for shipment {}", label.shipment_id))?
        .rows_affected()
            > 0;

        if inserted {
            for (format, artifact) in &label.artifacts {
                upsert_artifact(&mut tx, &label_id, *format, artifact).await?;
            }
        }
        tx.commit().await.context("commit label insert")?;

        let stored = self
            .get_label_for_shipment(&label.shipment_id)
            .await?
            .context("label missing after insert")?;
        Ok((stored, inserted))
    }

    pub async fn get_label(&self, label_id: &str) -> Result<Option<Label>> {
        let row = sqlx::query_as::<_, LabelRow>(
            "SELECT label_id, shipment_id, provider_id, label_url, created_at FROM labels WHERE label_id = ?",
        )
        .bind(label_id)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("query label {label_id}"))?;

        match row {
            Some(row) => Ok(Some(self.hydrate_label(row).await?)),
            None => Ok(None),
        }
    }

    pub async fn get_label_for_shipment(&self, shipment_id: &str) -> Result<Option<Label>> {
        let row = sqlx::query_as::<_, LabelRow>(
            "SELECT label_id, shipment_id, provider_id, label_url, created_at FROM labels WHERE shipment_id = ?",
        )
        .bind(shipment_id)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("query label for shipment {shipment_id}"))?;

        match row {
            Some(row) => Ok(Some(self.hydrate_label(row).await?)),
            None => Ok(None),
        }
    }

    /// Writes the primary URL and every artifact currently held by `label`.
    pub async fn save_label_urls(&self, label: &Label) -> Result<()> {
        let mut tx = self.pool.begin().await.context("begin label update")?;
        sqlx::query("UPDATE labels SET label_url = ? WHERE label_id = ?")
            .bind(&label.label_url)
            .bind(&label.id)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("update label {}", label.id))?;
        for (format, artifact) in &label.artifacts {
            upsert_artifact(&mut tx, &label.id, *format, artifact).await?;
        }
        tx.commit().await.context("commit label update")?;
        Ok(())
    }

    async fn hydrate_label(&self, row: LabelRow) -> Result<Label> {
        let artifacts = sqlx::query_as::<_, ArtifactRow>(
            "SELECT format, url, refreshed_at FROM label_artifacts WHERE label_id = ?",
        )
        .bind(&row.label_id)
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("query artifacts for label {}", row.label_id))?
        .into_iter()
        .map(|artifact| {
            let format = LabelFormat::from_str(&artifact.format)?;
            Ok((
                format,
                LabelArtifact {
                    url: artifact.url,
                    refreshed_at: parse_timestamp(&artifact.refreshed_at)?,
                },
            ))
        })
        .collect::<Result<BTreeMap<_, _>>>()?;

        Ok(Label {
            id: row.label_id,
            shipment_id: row.shipment_id,
            provider_id: row.provider_id,
            label_url: row.label_url,
            artifacts,
            created_at: parse_timestamp(&row.created_at)?,
        })
    }

    /// Records a tracking event unless an identical one exists. Returns
    /// whether a row was added.
    pub async fn insert_tracking_history(
        &self,
        shipment_id: &str,
        status: &str,
        message: &str,
        update_time: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            "INSERT INTO tracking_history(shipment_id, status, message, update_time, created_at) VALUES (?, ?, ?, ?, ?) ON CONFLICT(shipment_id, status, message, update_time) DO NOTHING",
        )
        .bind(shipment_id)
        .bind(status)
        .bind(message)
        .bind(timestamp(update_time))
        .bind(timestamp(Utc::now()))
        .execute(&self.pool)
        .await
        .with_context(|| format!("insert tracking history for shipment {shipment_id}"))?;

        let inserted = result.rows_affected() > 0;
        if !inserted {
            debug!(shipment_id = %shipment_id, status = %status, "tracking event already recorded");
        }
        Ok(inserted)
    }

    pub async fn list_tracking_history(&self, shipment_id: &str) -> Result<Vec<TrackingHistoryEntry>> {
        let rows = sqlx::query_as::<_, HistoryRow>(&format!(
            "SELECT {HISTORY_COLUMNS} FROM tracking_history WHERE shipment_id = ? ORDER BY update_time ASC, history_id ASC"
        ))
        .bind(shipment_id)
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("query tracking history for shipment {shipment_id}"))?;
        rows.into_iter().map(TrackingHistoryEntry::try_from).collect()
    }

    pub async fn latest_tracking_update(
        &self,
        shipment_id: &str,
    ) -> Result<Option<TrackingHistoryEntry>> {
        let row = sqlx::query_as::<_, HistoryRow>(&format!(
            "SELECT {HISTORY_COLUMNS} FROM tracking_history WHERE shipment_id = ? ORDER BY created_at DESC, history_id DESC LIMIT 1"
        ))
        .bind(shipment_id)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("query latest tracking update for shipment {shipment_id}"))?;
        row.map(TrackingHistoryEntry::try_from).transpose()
    }
}

async fn upsert_artifact(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    label_id: &str,
    format: LabelFormat,
    artifact: &LabelArtifact,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO label_artifacts(label_id, format, url, refreshed_at) VALUES (?, ?, ?, ?) ON CONFLICT(label_id, format) DO UPDATE SET url = excluded.url, refreshed_at = excluded.refreshed_at",
    )
    .bind(label_id)
    .bind(format.as_str())
    .bind(&artifact.url)
    .bind(timestamp(artifact.refreshed_at))
    .execute(&mut **tx)
    .await
    .with_context(|| format!("upsert {format} artifact for label {label_id}"))?;
    Ok(())
}

impl TryFrom<AddressRow> for Address {
    type Error = anyhow::Error;

    fn try_from(row: AddressRow) -> Result<Self> {
        Ok(Address {
            id: row.address_id,
            name: row.name,
            street1: row.street1,
            street2: row.street2,
            city: row.city,
            state: row.state,
            zip_code: row.zip_code,
            country: row.country,
            phone: row.phone,
            email: row.email,
            verified: row.verified,
            created_at: parse_timestamp(&row.created_at)?,
        })
    }
}

impl TryFrom<ParcelRow> for Parcel {
    type Error = anyhow::Error;

    fn try_from(row: ParcelRow) -> Result<Self> {
        let shape = match (row.predefined_package, row.length, row.width, row.height) {
            (Some(tag), _, _, _) => ParcelShape::Predefined(PredefinedPackage::from_str(&tag)?),
            (None, Some(length), Some(width), Some(height)) => ParcelShape::Dimensions {
                length,
                width,
                height,
            },
            _ => return Err(anyhow!("parcel {} has neither package nor dimensions", row.parcel_id)),
        };
        Ok(Parcel {
            id: row.parcel_id,
            shipment_id: row.shipment_id,
            provider_id: row.provider_id,
            shape,
            weight: row.weight,
            created_at: parse_timestamp(&row.created_at)?,
        })
    }
}

impl TryFrom<ShipmentRow> for Shipment {
    type Error = anyhow::Error;

    fn try_from(row: ShipmentRow) -> Result<Self> {
        let rate = row
            .rate
            .as_deref()
            .map(Decimal::from_str)
            .transpose()
            .with_context(|| format!("invalid rate stored for shipment {}", row.shipment_id))?;
        Ok(Shipment {
            refund_status: RefundStatus::from_str(&row.refund_status)?,
            tracking_status: TrackingStatus::from_str(&row.tracking_status)?,
            carrier: Carrier::from_str(&row.carrier)?,
            id: row.shipment_id,
            to_address_id: row.to_address_id,
            from_address_id: row.from_address_id,
            is_return: row.is_return,
            provider_id: row.provider_id,
            tracking_code: row.tracking_code,
            service: row.service,
            rate,
            created_at: parse_timestamp(&row.created_at)?,
        })
    }
}

impl TryFrom<HistoryRow> for TrackingHistoryEntry {
    type Error = anyhow::Error;

    fn try_from(row: HistoryRow) -> Result<Self> {
        Ok(TrackingHistoryEntry {
            id: row.history_id,
            shipment_id: row.shipment_id,
            status: row.status,
            message: row.message,
            update_time: parse_timestamp(&row.update_time)?,
            created_at: parse_timestamp(&row.created_at)?,
        })
    }
}

/// Fixed-width UTC form so stored timestamps sort lexically.
pub(crate) fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|parsed| parsed.with_timezone(&Utc))
        .with_context(|| format!("invalid stored timestamp {raw:?}"))
}

fn normalize_sqlite_uri(raw: &str) -> String {
    if raw.starts_with("sqlite:") {
        raw.to_string()
    } else {
        format!("sqlite://{raw}")
    }
}
