//! Notification fan-out driven by `notifications_config`.

use retrack_auth::{url_prefix_for, User};
use retrack_database::codec::{value_as_i64, value_to_text};
use retrack_database::{EngineRepository, NotificationRepository, NotificationRule, Record};
use serde_json::{json, Value};
use sqlx::SqlitePool;
use tracing::{debug, error, warn};

use super::error::ServiceError;

const DEFAULT_SENDER: &str = "Sistem";
const DEFAULT_TYPE: &str = "general";

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Recipient {
    pub id: i64,
    pub name: String,
    pub role: String,
}

impl From<&User> for Recipient {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            name: user.name.clone(),
            role: user.role.clone(),
        }
    }
}

/// Replace `:placeholder` tokens, preferring the longest name at each position.
pub fn render(template: &str, values: &[(&str, String)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(position) = rest.find(':') {
        out.push_str(&rest[..position]);
        let tail = &rest[position..];
        let matched = values
            .iter()
            .filter(|(name, _)| tail.starts_with(name))
            .max_by_key(|(name, _)| name.len());
        match matched {
            Some((name, value)) => {
                out.push_str(value);
                rest = &tail[name.len()..];
            }
            None => {
                out.push(':');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn record_text(record: &Record, key: &str) -> Option<String> {
    record
        .get(key)
        .and_then(value_to_text)
        .filter(|text| !text.trim().is_empty())
}

async fn find_recipient(pool: &SqlitePool, user_id: i64) -> Result<Option<Recipient>, ServiceError> {
    Ok(
        sqlx::query_as::<_, Recipient>("SELECT id, name, role FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_optional(pool)
            .await?,
    )
}

/// Run every rule configured for `table`. Failures are logged and skipped.
pub async fn notify_for_table(pool: &SqlitePool, table: &str, record: &Record, actor: Option<&User>) -> usize {
    let engine = EngineRepository::new(pool.clone());
    let rules = match engine.notification_rules_for(table).await {
        Ok(rules) => rules,
        Err(err) => {
            error!(table, error = %err, "failed to load notification rules");
            return 0;
        }
    };

    let mut sent = 0;
    for rule in &rules {
        match apply_rule(pool, table, record, actor, rule).await {
            Ok(count) => sent += count,
            Err(err) => error!(rule = rule.id, table, error = %err, "notification rule failed"),
        }
    }
    sent
}

async fn apply_rule(
    pool: &SqlitePool,
    table: &str,
    record: &Record,
    actor: Option<&User>,
    rule: &NotificationRule,
) -> Result<usize, ServiceError> {
    let sender = match rule.sender.as_deref().map(str::trim) {
        Some("auth") => actor.map(Recipient::from),
        Some(column) if !column.is_empty() => match record.get(column).and_then(value_as_i64) {
            Some(user_id) => find_recipient(pool, user_id).await?,
            None => None,
        },
        _ => None,
    };
    let sender_name = sender
        .as_ref()
        .map(|s| s.name.clone())
        .unwrap_or_else(|| DEFAULT_SENDER.to_string());

    let id = record_text(record, "id").unwrap_or_default();
    let uuid = record_text(record, "uuid").unwrap_or_default();
    let slug = record_text(record, "slug")
        .or_else(|| record_text(record, "uuid"))
        .unwrap_or_else(|| id.clone());
    let title = record_text(record, "title")
        .or_else(|| record_text(record, "name"))
        .unwrap_or_default();

    let base = [
        (":id", id.clone()),
        (":uuid", uuid),
        (":slug", slug.clone()),
        (":title", title),
        (":user", sender_name.clone()),
        (":sender", sender_name.clone()),
    ];

    let template = &rule.payload_template;
    let title = render(template.title.as_deref().unwrap_or_default(), &base);
    let message_template = template
        .message
        .as_deref()
        .filter(|m| !m.is_empty())
        .or(template.body.as_deref())
        .unwrap_or_default();
    let message = render(message_template, &base);
    let body = match template.body.as_deref().filter(|b| !b.is_empty()) {
        Some(body) => render(body, &base),
        None => message.clone(),
    };
    let url_template = template
        .url
        .as_deref()
        .filter(|u| !u.trim().is_empty())
        .map(|url| render(url, &base));
    let kind = template
        .kind
        .clone()
        .filter(|k| !k.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_TYPE.to_string());

    let recipients = recipients(pool, rule.receiver.as_deref(), record, sender.as_ref(), actor).await?;
    if recipients.is_empty() {
        debug!(rule = rule.id, table, "notification rule matched no recipients");
        return Ok(0);
    }

    let repo = NotificationRepository::new(pool.clone());
    let record_id = record.get("id").cloned().unwrap_or(Value::Null);
    for recipient in &recipients {
        let prefix = url_prefix_for(&recipient.role);
        let personal = [
            (":prefix", prefix.to_string()),
            (":role", recipient.role.clone()),
            (":slug", slug.clone()),
            (":id", id.clone()),
        ];
        let url = match &url_template {
            Some(url) => render(url, &personal),
            None => format!("{prefix}/sudut-info/{slug}"),
        };

        let data = json!({
            "title": title,
            "message": message,
            "body": body,
            "url": url,
            "type": kind,
            "actor_id": sender.as_ref().map(|s| s.id),
            "actor_name": sender_name,
            "table": table,
            "record_id": record_id,
        });
        repo.create(recipient.id, &kind, &data).await?;
    }

    Ok(recipients.len())
}

async fn recipients(
    pool: &SqlitePool,
    receiver: Option<&str>,
    record: &Record,
    sender: Option<&Recipient>,
    actor: Option<&User>,
) -> Result<Vec<Recipient>, ServiceError> {
    let receiver = receiver.map(str::trim).unwrap_or_default();

    let mut found = match receiver {
        "" => {
            warn!("notification rule without receiver");
            Vec::new()
        }
        "auth" => actor.map(Recipient::from).into_iter().collect(),
        "all" => {
            let privileged = sender
                .map(|s| matches!(s.role.as_str(), "admin" | "superadmin"))
                .unwrap_or(false);
            if !privileged {
                warn!("receiver `all` requires an admin sender");
                Vec::new()
            } else {
                sqlx::query_as::<_, Recipient>("SELECT id, name, role FROM users WHERE id != ? ORDER BY id")
                    .bind(sender.map(|s| s.id).unwrap_or_default())
                    .fetch_all(pool)
                    .await?
            }
        }
        "admin" => admins_for_district(pool, district_of(pool, record).await?.as_deref()).await?,
        other => {
            if let Some(role) = other.strip_prefix("role:") {
                users_with_roles(pool, &[role.trim()]).await?
            } else if let Some(roles) = other.strip_prefix("roles:") {
                let roles: Vec<&str> = roles.split(',').map(str::trim).filter(|r| !r.is_empty()).collect();
                users_with_roles(pool, &roles).await?
            } else if record.contains_key(other) {
                match record.get(other).and_then(value_as_i64) {
                    Some(user_id) => find_recipient(pool, user_id).await?.into_iter().collect(),
                    None => Vec::new(),
                }
            } else {
                warn!(receiver = other, "unknown notification receiver");
                Vec::new()
            }
        }
    };

    let mut seen = Vec::new();
    found.retain(|recipient| {
        if seen.contains(&recipient.id) {
            false
        } else {
            seen.push(recipient.id);
            true
        }
    });
    Ok(found)
}

async fn users_with_roles(pool: &SqlitePool, roles: &[&str]) -> Result<Vec<Recipient>, ServiceError> {
    if roles.is_empty() {
        return Ok(Vec::new());
    }
    let sql = format!(
        "SELECT id, name, role FROM users WHERE role IN ({}) ORDER BY id",
        vec!["?"; roles.len()].join(", ")
    );
    let mut query = sqlx::query_as::<_, Recipient>(&sql);
    for role in roles {
        query = query.bind(*role);
    }
    Ok(query.fetch_all(pool).await?)
}

/// The record's `parol_daerah`, else its mentor's.
async fn district_of(pool: &SqlitePool, record: &Record) -> Result<Option<String>, ServiceError> {
    if let Some(district) = record_text(record, "parol_daerah") {
        return Ok(Some(district));
    }
    let Some(mentor_id) = record.get("mentor_id").and_then(value_as_i64) else {
        return Ok(None);
    };

    for column in ["user_id", "id"] {
        let sql = format!("SELECT parol_daerah FROM mentors WHERE {column} = ? LIMIT 1");
        let district: Option<Option<String>> = sqlx::query_scalar(&sql)
            .bind(mentor_id)
            .fetch_optional(pool)
            .await?;
        if let Some(Some(district)) = district {
            if !district.trim().is_empty() {
                return Ok(Some(district));
            }
        }
    }
    Ok(None)
}

/// Admins of `district`, or every admin when no district is known.
pub async fn admins_for_district(
    pool: &SqlitePool,
    district: Option<&str>,
) -> Result<Vec<Recipient>, ServiceError> {
    let admins = match district {
        Some(district) => {
            sqlx::query_as::<_, Recipient>(
                "SELECT u.id, u.name, u.role FROM users u JOIN admins a ON a.user_id = u.id \
                 WHERE a.parol_daerah = ? ORDER BY u.id",
            )
            .bind(district)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query_as::<_, Recipient>(
                "SELECT id, name, role FROM users WHERE role IN ('admin', 'superadmin') ORDER BY id",
            )
            .fetch_all(pool)
            .await?
        }
    };
    Ok(admins)
}
