//! services/campaign_service.rs
//! Lecturas de campaña/destinatarios y escrituras de estado e historial.
//! Todo pasa por `Store`: una conexión corta por sentencia.

use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use crate::models::campaign_model::{
    Campaign, CampaignContent, CampaignStatus, Channel, DeliveryOutcome, HistoryRecord,
    NewHistoryRecord, OutboundMessage, Recipient,
};
use crate::models::now_rfc3339;
use crate::services::transaction_helper::{Statement, Store, StoreError};

#[derive(Debug, Clone)]
pub struct CampaignService {
    store: Store,
}

impl CampaignService {
    pub fn new(store: Store) -> Self {
        CampaignService { store }
    }

    pub async fn load_campaign(
        &self,
        campaign_id: i64,
        channel: Channel,
    ) -> Result<Option<Campaign>, StoreError> {
        let content_columns = match channel {
            Channel::Email => "subject, body",
            Channel::Sms => "message",
        };
        let sql = format!(
            r#"
            SELECT id, name, {content_columns}, status, last_updated, processing_details
            FROM {table}
            WHERE id = ?1
            "#,
            table = channel.campaigns_table()
        );

        self.store
            .fetch_optional(&Statement::new(sql).bind(campaign_id), |row| {
                campaign_from_row(row, channel)
            })
            .await
    }

    /// Destinatarios con destino no vacío, en orden estable (nombre, id).
    /// La validación del formato la hace el worker.
    pub async fn load_recipients(
        &self,
        campaign_id: i64,
        channel: Channel,
    ) -> Result<Vec<Recipient>, StoreError> {
        let sql = format!(
            r#"
            SELECT c.id, c.name, c.email, c.mobile
            FROM contacts c
            JOIN {junction} j ON c.id = j.contact_id
            WHERE j.campaign_id = ?1
              AND c.{column} IS NOT NULL AND TRIM(c.{column}) != ''
            ORDER BY c.name, c.id
            "#,
            junction = channel.contacts_table(),
            column = channel.destination_column()
        );

        self.store
            .fetch_all(&Statement::new(sql).bind(campaign_id), |row| {
                Ok(Recipient {
                    id: row.try_get("id")?,
                    name: row.try_get("name")?,
                    email: row.try_get("email")?,
                    mobile: row.try_get("mobile")?,
                })
            })
            .await
    }

    /// Actualiza estado + detalle. Devuelve las filas afectadas (0 si no existe).
    pub async fn update_status(
        &self,
        campaign_id: i64,
        channel: Channel,
        status: CampaignStatus,
        details: Option<&str>,
    ) -> Result<u64, StoreError> {
        let sql = format!(
            r#"
            UPDATE {table}
            SET status = ?1, last_updated = ?2, processing_details = ?3
            WHERE id = ?4
            "#,
            table = channel.campaigns_table()
        );
        self.store
            .execute(
                &Statement::new(sql)
                    .bind(status.as_str())
                    .bind(now_rfc3339())
                    .bind(details)
                    .bind(campaign_id),
            )
            .await
    }

    /// Acción explícita del operador: vuelve la campaña a `draft`, también
    /// desde un `running` huérfano. Quien llama comprueba antes que no haya
    /// un worker vivo.
    pub async fn reset_to_draft(
        &self,
        campaign_id: i64,
        channel: Channel,
    ) -> Result<u64, StoreError> {
        let sql = format!(
            r#"
            UPDATE {table}
            SET status = 'draft', last_updated = ?1, processing_details = NULL
            WHERE id = ?2
            "#,
            table = channel.campaigns_table()
        );
        self.store
            .execute(&Statement::new(sql).bind(now_rfc3339()).bind(campaign_id))
            .await
    }

    /// Historial append-only: la tabla sale del tipo de contenido.
    pub async fn append_history(&self, record: &NewHistoryRecord) -> Result<i64, StoreError> {
        let stmt = match &record.content {
            OutboundMessage::Email { subject, body } => Statement::new(
                r#"
                INSERT INTO email_campaign_history
                    (campaign_id, contact_id, timestamp, status, error,
                     personalized_subject, personalized_body)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
            )
            .bind(record.campaign_id)
            .bind(record.contact_id)
            .bind(now_rfc3339())
            .bind(record.outcome.as_str())
            .bind(record.error.clone())
            .bind(subject.as_str())
            .bind(body.as_str()),
            OutboundMessage::Sms { text } => Statement::new(
                r#"
                INSERT INTO sms_campaign_history
                    (campaign_id, contact_id, timestamp, status, error, personalized_message)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
            )
            .bind(record.campaign_id)
            .bind(record.contact_id)
            .bind(now_rfc3339())
            .bind(record.outcome.as_str())
            .bind(record.error.clone())
            .bind(text.as_str()),
        };
        self.store.insert(&stmt).await
    }

    pub async fn list_history(
        &self,
        campaign_id: i64,
        channel: Channel,
    ) -> Result<Vec<HistoryRecord>, StoreError> {
        let content_columns = match channel {
            Channel::Email => "personalized_subject, personalized_body",
            Channel::Sms => "personalized_message",
        };
        let sql = format!(
            r#"
            SELECT id, campaign_id, contact_id, timestamp, status, error, {content_columns}
            FROM {table}
            WHERE campaign_id = ?1
            ORDER BY id
            "#,
            table = channel.history_table()
        );

        self.store
            .fetch_all(&Statement::new(sql).bind(campaign_id), |row| {
                history_from_row(row, channel)
            })
            .await
    }
}

fn campaign_from_row(row: &SqliteRow, channel: Channel) -> Result<Campaign, sqlx::Error> {
    let content = match channel {
        Channel::Email => CampaignContent::Email {
            subject: row.try_get::<Option<String>, _>("subject")?.unwrap_or_default(),
            body: row.try_get::<Option<String>, _>("body")?.unwrap_or_default(),
        },
        Channel::Sms => CampaignContent::Sms {
            message: row.try_get::<Option<String>, _>("message")?.unwrap_or_default(),
        },
    };
    let status_raw: String = row.try_get("status")?;
    let status = status_raw.parse().map_err(|e: String| sqlx::Error::ColumnDecode {
        index: "status".to_string(),
        source: e.into(),
    })?;

    Ok(Campaign {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        channel,
        content,
        status,
        last_updated: row.try_get("last_updated")?,
        processing_details: row.try_get("processing_details")?,
    })
}

fn history_from_row(row: &SqliteRow, channel: Channel) -> Result<HistoryRecord, sqlx::Error> {
    let content = match channel {
        Channel::Email => OutboundMessage::Email {
            subject: row
                .try_get::<Option<String>, _>("personalized_subject")?
                .unwrap_or_default(),
            body: row
                .try_get::<Option<String>, _>("personalized_body")?
                .unwrap_or_default(),
        },
        Channel::Sms => OutboundMessage::Sms {
            text: row
                .try_get::<Option<String>, _>("personalized_message")?
                .unwrap_or_default(),
        },
    };
    let status_raw: String = row.try_get("status")?;
    let status: DeliveryOutcome =
        status_raw
            .parse()
            .map_err(|e: String| sqlx::Error::ColumnDecode {
                index: "status".to_string(),
                source: e.into(),
            })?;

    Ok(HistoryRecord {
        id: row.try_get("id")?,
        campaign_id: row.try_get("campaign_id")?,
        contact_id: row.try_get("contact_id")?,
        timestamp: row.try_get("timestamp")?,
        status,
        error: row.try_get("error")?,
        content,
    })
}
