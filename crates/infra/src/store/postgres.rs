//! Postgres-backed pharmacy store.
//!
//! Prescriptions and inventory live in two tables, with verification views
//! appended to a third (see `schema.sql`). The redemption commit runs in a single transaction:
//!
//! 1. Claim the prescription with a conditional `UPDATE` that only matches an
//!    undispensed row still bound to the submitted code and hospital. The row
//!    lock it takes serializes concurrent redemptions of the same prescription;
//!    a loser re-evaluates the predicate after the winner commits and matches
//!    nothing.
//! 2. Decrement each planned line with `stock_quantity >= $n` in the `WHERE`
//!    clause, in medicine-name order so two redemptions touching overlapping
//!    medicines lock rows in the same order.
//! 3. Commit, or roll back on the first line that cannot be covered.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError | Scenario |
//! |------------|----------------------|------------|----------|
//! | Database (unique violation) | `23505` | `Conflict` | Duplicate prescription id or live access code |
//! | Database (check violation) | `23514` | `Corrupt` | Row would break a table invariant |
//! | Database (other) | Any other | `Unavailable` | Other database errors |
//! | PoolClosed / Io / Tls / PoolTimedOut | N/A | `Unavailable` | Backend unreachable |
//! | Decode / ColumnDecode | N/A | `Corrupt` | Stored value cannot be read back |

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{FromRow, PgPool, Row};
use tracing::{Span, instrument};
use uuid::Uuid;

use hsync_core::{HospitalId, PatientId, PrescriptionId, StaffId};
use hsync_inventory::{InventoryItem, InventoryKey, MedicineName, StockShortfall};
use hsync_prescriptions::{
    AccessCode, DispensePlan, DispenseState, MedicineLineItem, Prescription, PrescriptionDraft,
};

use super::r#trait::{
    AccessLogEntry, AccessLogStore, Debit, DispenseCommit, DispenseLedger, DispensedLine, InventoryStore, PrescriptionStore,
    StoreError,
};

const SCHEMA: &str = include_str!("schema.sql");

const PRESCRIPTION_COLUMNS: &str = "id, hospital_id, patient_id, doctor_id, diagnosis_code, \
     medicines, lab_tests, access_code, dispensed, dispensed_at, created_at";

const INVENTORY_COLUMNS: &str =
    "hospital_id, medicine_name, stock_quantity, threshold_limit, unit_price";

const DECREMENT_SQL: &str = r#"
    UPDATE inventory
    SET stock_quantity = stock_quantity - $3, updated_at = NOW()
    WHERE hospital_id = $1
      AND medicine_name = $2
      AND $3 >= 0
      AND stock_quantity >= $3
    RETURNING stock_quantity
"#;

/// Postgres-backed pharmacy store.
///
/// `Send + Sync`; clones share the same connection pool.
#[derive(Debug, Clone)]
pub struct PostgresPharmacyStore {
    pool: Arc<PgPool>,
}

impl PostgresPharmacyStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Open a pool against `database_url`.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Create tables and indexes if they do not exist yet.
    #[instrument(skip(self), err)]
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }

    async fn fetch_prescription(
        &self,
        operation: &str,
        query: sqlx::query::Query<'_, sqlx::Postgres, sqlx::postgres::PgArguments>,
    ) -> Result<Option<Prescription>, StoreError> {
        let row = query
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;
        row.map(|row| decode_prescription(&row)).transpose()
    }

    async fn fetch_items(
        &self,
        operation: &str,
        sql: &str,
        hospital_id: HospitalId,
    ) -> Result<Vec<InventoryItem>, StoreError> {
        let rows = sqlx::query(sql)
            .bind(hospital_id.as_uuid())
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;

        let items = rows
            .iter()
            .map(decode_item)
            .collect::<Result<Vec<_>, _>>()?;
        Span::current().record("item_count", items.len());
        Ok(items)
    }
}

#[async_trait::async_trait]
impl PrescriptionStore for PostgresPharmacyStore {
    #[instrument(
        skip(self, prescription),
        fields(
            operation = "insert_prescription",
            prescription_id = %prescription.id_typed(),
            hospital_id = %prescription.hospital_id()
        ),
        err
    )]
    async fn insert(&self, prescription: &Prescription) -> Result<(), StoreError> {
        let medicines = serde_json::to_value(prescription.medicines())
            .map_err(|e| StoreError::Corrupt(format!("failed to encode medicines: {e}")))?;
        let lab_tests = serde_json::to_value(prescription.lab_tests())
            .map_err(|e| StoreError::Corrupt(format!("failed to encode lab tests: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO prescriptions (
                id, hospital_id, patient_id, doctor_id, diagnosis_code,
                medicines, lab_tests, access_code, dispensed, dispensed_at, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(prescription.id_typed().as_uuid())
        .bind(prescription.hospital_id().as_uuid())
        .bind(prescription.patient_id().as_uuid())
        .bind(prescription.doctor_id().as_uuid())
        .bind(prescription.diagnosis_code())
        .bind(medicines)
        .bind(lab_tests)
        .bind(prescription.access_code().map(AccessCode::as_str))
        .bind(prescription.is_dispensed())
        .bind(prescription.dispensed_at())
        .bind(prescription.created_at())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_prescription", e))?;

        Ok(())
    }

    #[instrument(skip(self), fields(operation = "get_prescription", prescription_id = %id), err)]
    async fn get(&self, id: PrescriptionId) -> Result<Option<Prescription>, StoreError> {
        let sql = format!("SELECT {PRESCRIPTION_COLUMNS} FROM prescriptions WHERE id = $1");
        self.fetch_prescription("get_prescription", sqlx::query(&sql).bind(id.as_uuid()))
            .await
    }

    #[instrument(
        skip(self, access_code),
        fields(operation = "find_by_access_code", hospital_id = %hospital_id),
        err
    )]
    async fn find_by_access_code_and_hospital(
        &self,
        access_code: &AccessCode,
        hospital_id: HospitalId,
    ) -> Result<Option<Prescription>, StoreError> {
        let sql = format!(
            "SELECT {PRESCRIPTION_COLUMNS} FROM prescriptions \
             WHERE access_code = $1 AND hospital_id = $2 AND dispensed = FALSE"
        );
        self.fetch_prescription(
            "find_by_access_code",
            sqlx::query(&sql)
                .bind(access_code.as_str())
                .bind(hospital_id.as_uuid()),
        )
        .await
    }

    #[instrument(skip(self), fields(operation = "mark_dispensed", prescription_id = %id), err)]
    async fn mark_dispensed(
        &self,
        id: PrescriptionId,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE prescriptions
            SET dispensed = TRUE, dispensed_at = $2, access_code = NULL
            WHERE id = $1 AND dispensed = FALSE
            "#,
        )
        .bind(id.as_uuid())
        .bind(at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("mark_dispensed", e))?;

        Ok(result.rows_affected() == 1)
    }
}

#[async_trait::async_trait]
impl InventoryStore for PostgresPharmacyStore {
    #[instrument(
        skip(self, item),
        fields(
            operation = "upsert_inventory",
            hospital_id = %item.hospital_id(),
            medicine = %item.medicine()
        ),
        err
    )]
    async fn upsert(&self, item: &InventoryItem) -> Result<(), StoreError> {
        let unit_price = i64::try_from(item.unit_price())
            .map_err(|_| StoreError::Corrupt(format!("unit price of {} out of range", item.medicine())))?;

        sqlx::query(
            r#"
            INSERT INTO inventory (hospital_id, medicine_name, stock_quantity, threshold_limit, unit_price, updated_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            ON CONFLICT (hospital_id, medicine_name) DO UPDATE
            SET stock_quantity = EXCLUDED.stock_quantity,
                threshold_limit = EXCLUDED.threshold_limit,
                unit_price = EXCLUDED.unit_price,
                updated_at = NOW()
            "#,
        )
        .bind(item.hospital_id().as_uuid())
        .bind(item.medicine().as_str())
        .bind(item.stock())
        .bind(item.threshold())
        .bind(unit_price)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("upsert_inventory", e))?;

        Ok(())
    }

    #[instrument(
        skip(self, key),
        fields(operation = "get_inventory", hospital_id = %key.hospital_id, medicine = %key.medicine),
        err
    )]
    async fn get_item(&self, key: &InventoryKey) -> Result<Option<InventoryItem>, StoreError> {
        let sql = format!(
            "SELECT {INVENTORY_COLUMNS} FROM inventory WHERE hospital_id = $1 AND medicine_name = $2"
        );
        let row = sqlx::query(&sql)
            .bind(key.hospital_id.as_uuid())
            .bind(key.medicine.as_str())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_inventory", e))?;
        row.as_ref().map(decode_item).transpose()
    }

    #[instrument(
        skip(self),
        fields(operation = "list_inventory", hospital_id = %hospital_id, item_count = tracing::field::Empty),
        err
    )]
    async fn list(&self, hospital_id: HospitalId) -> Result<Vec<InventoryItem>, StoreError> {
        let sql = format!(
            "SELECT {INVENTORY_COLUMNS} FROM inventory WHERE hospital_id = $1 ORDER BY medicine_name ASC"
        );
        self.fetch_items("list_inventory", &sql, hospital_id).await
    }

    #[instrument(
        skip(self),
        fields(operation = "low_stock", hospital_id = %hospital_id, item_count = tracing::field::Empty),
        err
    )]
    async fn low_stock(&self, hospital_id: HospitalId) -> Result<Vec<InventoryItem>, StoreError> {
        let sql = format!(
            "SELECT {INVENTORY_COLUMNS} FROM inventory \
             WHERE hospital_id = $1 AND stock_quantity <= threshold_limit \
             ORDER BY medicine_name ASC"
        );
        self.fetch_items("low_stock", &sql, hospital_id).await
    }

    #[instrument(
        skip(self, key),
        fields(operation = "try_decrement", hospital_id = %key.hospital_id, medicine = %key.medicine),
        err
    )]
    async fn try_decrement(&self, key: &InventoryKey, amount: i64) -> Result<Debit, StoreError> {
        let row = sqlx::query(DECREMENT_SQL)
            .bind(key.hospital_id.as_uuid())
            .bind(key.medicine.as_str())
            .bind(amount)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("try_decrement", e))?;

        if let Some(row) = row {
            let remaining: i64 = row
                .try_get("stock_quantity")
                .map_err(|e| map_sqlx_error("try_decrement", e))?;
            return Ok(Debit::Applied { remaining });
        }

        let available = current_stock(&*self.pool, key.hospital_id.as_uuid(), key.medicine.as_str())
            .await
            .map_err(|e| map_sqlx_error("try_decrement", e))?;
        Ok(Debit::Insufficient(StockShortfall {
            required: amount,
            available,
        }))
    }
}

#[async_trait::async_trait]
impl DispenseLedger for PostgresPharmacyStore {
    #[instrument(
        skip(self, plan),
        fields(
            operation = "commit_dispense",
            prescription_id = %plan.prescription_id,
            hospital_id = %plan.hospital_id,
            line_count = plan.lines.len()
        ),
        err
    )]
    async fn commit_dispense(
        &self,
        plan: &DispensePlan,
        at: DateTime<Utc>,
    ) -> Result<DispenseCommit, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("commit_dispense.begin", e))?;

        let claimed = sqlx::query(
            r#"
            UPDATE prescriptions
            SET dispensed = TRUE, dispensed_at = $4, access_code = NULL
            WHERE id = $1
              AND hospital_id = $2
              AND access_code = $3
              AND dispensed = FALSE
            "#,
        )
        .bind(plan.prescription_id.as_uuid())
        .bind(plan.hospital_id.as_uuid())
        .bind(plan.access_code.as_str())
        .bind(at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("commit_dispense.claim", e))?
        .rows_affected();

        if claimed != 1 {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("commit_dispense.rollback", e))?;
            return Ok(DispenseCommit::ClaimLost);
        }

        let mut lines = Vec::with_capacity(plan.lines.len());
        for line in &plan.lines {
            let row = sqlx::query(DECREMENT_SQL)
                .bind(plan.hospital_id.as_uuid())
                .bind(line.medicine.as_str())
                .bind(line.quantity)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("commit_dispense.decrement", e))?;

            match row {
                Some(row) => {
                    let remaining: i64 = row
                        .try_get("stock_quantity")
                        .map_err(|e| map_sqlx_error("commit_dispense.decrement", e))?;
                    lines.push(DispensedLine {
                        medicine: line.medicine.clone(),
                        quantity: line.quantity,
                        remaining,
                    });
                }
                None => {
                    let available =
                        current_stock(&mut *tx, plan.hospital_id.as_uuid(), line.medicine.as_str())
                            .await
                            .map_err(|e| map_sqlx_error("commit_dispense.stock", e))?;
                    tx.rollback()
                        .await
                        .map_err(|e| map_sqlx_error("commit_dispense.rollback", e))?;
                    return Ok(DispenseCommit::Shortfall {
                        medicine: line.medicine.clone(),
                        shortfall: StockShortfall {
                            required: line.quantity,
                            available,
                        },
                    });
                }
            }
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_dispense.commit", e))?;

        Ok(DispenseCommit::Committed { lines })
    }
}

#[async_trait::async_trait]
impl AccessLogStore for PostgresPharmacyStore {
    #[instrument(
        skip(self, entry),
        fields(operation = "record_access", record_id = %entry.record_id, viewer_id = %entry.viewer_id),
        err
    )]
    async fn record_access(&self, entry: &AccessLogEntry) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO access_logs (id, viewer_id, patient_id, record_id, reason, viewed_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(entry.viewer_id.as_uuid())
        .bind(entry.patient_id.as_uuid())
        .bind(entry.record_id.as_uuid())
        .bind(entry.reason.as_str())
        .bind(entry.viewed_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("record_access", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(operation = "access_log", record_id = %record_id), err)]
    async fn access_log(&self, record_id: PrescriptionId) -> Result<Vec<AccessLogEntry>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT viewer_id, patient_id, record_id, reason, viewed_at
            FROM access_logs
            WHERE record_id = $1
            ORDER BY viewed_at ASC, id ASC
            "#,
        )
        .bind(record_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("access_log", e))?;

        rows.iter().map(decode_access).collect()
    }
}

/// Current stock of a line, or 0 when the line does not exist.
async fn current_stock<'e, E>(
    executor: E,
    hospital_id: &Uuid,
    medicine: &str,
) -> Result<i64, sqlx::Error>
where
    E: sqlx::PgExecutor<'e>,
{
    let stock: Option<i64> = sqlx::query_scalar(
        "SELECT stock_quantity FROM inventory WHERE hospital_id = $1 AND medicine_name = $2",
    )
    .bind(hospital_id)
    .bind(medicine)
    .fetch_optional(executor)
    .await?;
    Ok(stock.unwrap_or(0))
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::Conflict(msg),
                Some("23514") => StoreError::Corrupt(msg),
                _ => StoreError::Unavailable(msg),
            }
        }
        sqlx::Error::Decode(e) => {
            StoreError::Corrupt(format!("decode error in {}: {}", operation, e))
        }
        sqlx::Error::ColumnDecode { index, source } => StoreError::Corrupt(format!(
            "column {} could not be decoded in {}: {}",
            index, operation, source
        )),
        sqlx::Error::PoolClosed => {
            StoreError::Unavailable(format!("connection pool closed in {}", operation))
        }
        _ => StoreError::Unavailable(format!("sqlx error in {}: {}", operation, err)),
    }
}

/// Raw prescription row as stored in the `prescriptions` table.
#[derive(Debug)]
struct PrescriptionRow {
    id: Uuid,
    hospital_id: Uuid,
    patient_id: Uuid,
    doctor_id: Uuid,
    diagnosis_code: String,
    medicines: JsonValue,
    lab_tests: JsonValue,
    access_code: Option<String>,
    dispensed: bool,
    dispensed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, PgRow> for PrescriptionRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(PrescriptionRow {
            id: row.try_get("id")?,
            hospital_id: row.try_get("hospital_id")?,
            patient_id: row.try_get("patient_id")?,
            doctor_id: row.try_get("doctor_id")?,
            diagnosis_code: row.try_get("diagnosis_code")?,
            medicines: row.try_get("medicines")?,
            lab_tests: row.try_get("lab_tests")?,
            access_code: row.try_get("access_code")?,
            dispensed: row.try_get("dispensed")?,
            dispensed_at: row.try_get("dispensed_at")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl TryFrom<PrescriptionRow> for Prescription {
    type Error = StoreError;

    fn try_from(row: PrescriptionRow) -> Result<Self, Self::Error> {
        let id = row.id;
        let corrupt = |what: &str, e: &dyn std::fmt::Display| {
            StoreError::Corrupt(format!("prescription {id}: {what}: {e}"))
        };

        let medicines: Vec<MedicineLineItem> =
            serde_json::from_value(row.medicines).map_err(|e| corrupt("medicines", &e))?;
        let lab_tests: Vec<String> =
            serde_json::from_value(row.lab_tests).map_err(|e| corrupt("lab tests", &e))?;
        let access_code = row
            .access_code
            .as_deref()
            .map(AccessCode::parse)
            .transpose()
            .map_err(|e| corrupt("access code", &e))?;
        let state = DispenseState::from_columns(access_code, row.dispensed, row.dispensed_at)
            .map_err(|e| corrupt("dispense state", &e))?;

        let draft = PrescriptionDraft {
            hospital_id: HospitalId::from_uuid(row.hospital_id),
            patient_id: PatientId::from_uuid(row.patient_id),
            doctor_id: StaffId::from_uuid(row.doctor_id),
            diagnosis_code: row.diagnosis_code,
            medicines,
            lab_tests,
        };
        Prescription::from_parts(PrescriptionId::from_uuid(id), draft, state, row.created_at)
            .map_err(|e| corrupt("contents", &e))
    }
}

fn decode_prescription(row: &PgRow) -> Result<Prescription, StoreError> {
    let raw = PrescriptionRow::from_row(row).map_err(|e| map_sqlx_error("decode_prescription", e))?;
    Prescription::try_from(raw)
}

fn decode_item(row: &PgRow) -> Result<InventoryItem, StoreError> {
    let decode = |e: sqlx::Error| map_sqlx_error("decode_inventory", e);
    let hospital_id: Uuid = row.try_get("hospital_id").map_err(decode)?;
    let name: String = row.try_get("medicine_name").map_err(decode)?;
    let stock: i64 = row.try_get("stock_quantity").map_err(decode)?;
    let threshold: i64 = row.try_get("threshold_limit").map_err(decode)?;
    let unit_price: i64 = row.try_get("unit_price").map_err(decode)?;

    let corrupt = |e: &dyn std::fmt::Display| {
        StoreError::Corrupt(format!("inventory line {name:?} of {hospital_id}: {e}"))
    };
    let medicine = MedicineName::new(name.as_str()).map_err(|e| corrupt(&e))?;
    let unit_price = u64::try_from(unit_price).map_err(|e| corrupt(&e))?;
    InventoryItem::new(
        HospitalId::from_uuid(hospital_id),
        medicine,
        stock,
        threshold,
        unit_price,
    )
    .map_err(|e| corrupt(&e))
}

fn decode_access(row: &PgRow) -> Result<AccessLogEntry, StoreError> {
    let decode = |e: sqlx::Error| map_sqlx_error("decode_access", e);
    Ok(AccessLogEntry {
        viewer_id: StaffId::from_uuid(row.try_get("viewer_id").map_err(decode)?),
        patient_id: PatientId::from_uuid(row.try_get("patient_id").map_err(decode)?),
        record_id: PrescriptionId::from_uuid(row.try_get("record_id").map_err(decode)?),
        reason: row.try_get("reason").map_err(decode)?,
        viewed_at: row.try_get("viewed_at").map_err(decode)?,
    })
}
