use chrono::{NaiveDate, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Result as SqlResult, Row};

use super::Database;
use crate::models::{AdCost, Fee, FeeRow, NewAdCost, NewFee, Platform};

fn fee_from_row(row: &Row<'_>) -> SqlResult<Fee> {
    Ok(Fee {
        id: row.get(0)?,
        invoice_id: row.get(1)?,
        fee_type: row.get(2)?,
        amount: row.get(3)?,
        description: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn ad_cost_from_row(row: &Row<'_>) -> SqlResult<AdCost> {
    Ok(AdCost {
        id: row.get(0)?,
        data: NewAdCost {
            platform: row.get(1)?,
            date: row.get(2)?,
            amount: row.get(3)?,
            campaign: row.get(4)?,
            description: row.get(5)?,
        },
        created_at: row.get(6)?,
    })
}

/// Optional date range plus platform, shared by fee and ad cost queries.
fn range_clause(
    date_column: &str,
    platform_column: &str,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
    platform: Option<Platform>,
) -> (String, Vec<Value>) {
    let mut clauses = Vec::new();
    let mut values = Vec::new();
    if let Some(from) = from {
        clauses.push(format!("{} >= ?", date_column));
        values.push(Value::Text(from.format("%Y-%m-%d").to_string()));
    }
    if let Some(to) = to {
        clauses.push(format!("{} <= ?", date_column));
        values.push(Value::Text(to.format("%Y-%m-%d").to_string()));
    }
    if let Some(platform) = platform {
        clauses.push(format!("{} = ?", platform_column));
        values.push(Value::Text(platform.as_str().to_string()));
    }
    if clauses.is_empty() {
        (String::new(), values)
    } else {
        (format!(" WHERE {}", clauses.join(" AND ")), values)
    }
}

impl Database {
    pub fn insert_fee(&self, invoice_id: i64, fee: &NewFee) -> SqlResult<Fee> {
        let now = Utc::now();
        self.conn.execute(
            "INSERT INTO fees (rechnung_id, gebuehr_typ, betrag, beschreibung, erstellt_am)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![invoice_id, fee.fee_type, fee.amount, fee.description, now],
        )?;
        Ok(Fee {
            id: self.conn.last_insert_rowid(),
            invoice_id,
            fee_type: fee.fee_type,
            amount: fee.amount,
            description: fee.description.clone(),
            created_at: now,
        })
    }

    pub fn fees_for_invoice(&self, invoice_id: i64) -> SqlResult<Vec<Fee>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, rechnung_id, gebuehr_typ, betrag, beschreibung, erstellt_am
             FROM fees WHERE rechnung_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![invoice_id], fee_from_row)?;
        rows.collect()
    }

    pub fn delete_fee(&self, id: i64) -> SqlResult<bool> {
        let changed = self.conn.execute("DELETE FROM fees WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    }

    pub fn list_fee_rows(
        &self,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
        platform: Option<Platform>,
    ) -> SqlResult<Vec<FeeRow>> {
        let (where_sql, values) = range_clause("i.datum", "i.plattform", from, to, platform);
        let sql = format!(
            "SELECT f.id, f.rechnung_id, f.gebuehr_typ, f.betrag, f.beschreibung, f.erstellt_am,
                    i.rechnungsnummer, i.datum, i.plattform
             FROM fees f JOIN invoices i ON i.id = f.rechnung_id{}
             ORDER BY i.datum, f.id",
            where_sql
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), |row| {
            Ok(FeeRow {
                fee: fee_from_row(row)?,
                invoice_number: row.get(6)?,
                invoice_date: row.get(7)?,
                platform: row.get(8)?,
            })
        })?;
        rows.collect()
    }

    pub fn insert_ad_cost(&self, cost: &NewAdCost) -> SqlResult<AdCost> {
        let now = Utc::now();
        self.conn.execute(
            "INSERT INTO ad_costs (plattform, datum, betrag, kampagne, beschreibung, erstellt_am)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                cost.platform,
                cost.date,
                cost.amount,
                cost.campaign,
                cost.description,
                now
            ],
        )?;
        Ok(AdCost {
            id: self.conn.last_insert_rowid(),
            data: cost.clone(),
            created_at: now,
        })
    }

    pub fn list_ad_costs(
        &self,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
        platform: Option<Platform>,
    ) -> SqlResult<Vec<AdCost>> {
        let (where_sql, values) = range_clause("datum", "plattform", from, to, platform);
        let sql = format!(
            "SELECT id, plattform, datum, betrag, kampagne, beschreibung, erstellt_am
             FROM ad_costs{} ORDER BY datum, id",
            where_sql
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), ad_cost_from_row)?;
        rows.collect()
    }

    pub fn delete_ad_cost(&self, id: i64) -> SqlResult<bool> {
        let changed = self
            .conn
            .execute("DELETE FROM ad_costs WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_fixtures::platform_invoice;
    use crate::models::FeeType;

    #[test]
    fn fees_follow_their_invoice() {
        let db = Database::open_in_memory().unwrap();
        let id = db
            .insert_invoice(&platform_invoice("EB-1", "2024-05-02", Platform::Ebay, 50.0))
            .unwrap();
        let fee = db
            .insert_fee(
                id,
                &NewFee {
                    fee_type: FeeType::Shipping,
                    amount: 4.99,
                    description: Some("DHL".to_string()),
                },
            )
            .unwrap();
        assert_eq!(db.fees_for_invoice(id).unwrap(), vec![fee]);

        let rows = db
            .list_fee_rows(None, None, Some(Platform::Ebay))
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].invoice_number, "EB-1");
        assert!(db.list_fee_rows(None, None, Some(Platform::Amazon)).unwrap().is_empty());

        db.delete_invoice(id).unwrap();
        assert!(db.fees_for_invoice(id).unwrap().is_empty());
    }

    #[test]
    fn ad_costs_filter_by_range_and_platform() {
        let db = Database::open_in_memory().unwrap();
        for (platform, date) in [
            (Platform::Amazon, "2024-01-10"),
            (Platform::Amazon, "2024-02-10"),
            (Platform::Ebay, "2024-01-20"),
        ] {
            db.insert_ad_cost(&NewAdCost {
                platform,
                date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
                amount: 25.0,
                campaign: None,
                description: None,
            })
            .unwrap();
        }

        let january = db
            .list_ad_costs(
                NaiveDate::from_ymd_opt(2024, 1, 1),
                NaiveDate::from_ymd_opt(2024, 1, 31),
                Some(Platform::Amazon),
            )
            .unwrap();
        assert_eq!(january.len(), 1);
        assert!(db.delete_ad_cost(january[0].id).unwrap());
        assert_eq!(db.list_ad_costs(None, None, None).unwrap().len(), 2);
    }
}
