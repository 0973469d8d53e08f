//! Database tools: natural-language queries, fake-data population and
//! schema listing.

use anyhow::Context;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{opt_u64_arg, str_arg, Tool};
use crate::config::DatabaseConfig;
use crate::db::populate::Populator;
use crate::db::Database;
use crate::provider::types::ChatMessage;
use crate::provider::LlmProvider;

const SQL_MAX_TOKENS: u32 = 300;
const MAX_POPULATE_ROWS: u64 = 10_000;

/// Render every table as `name(col TYPE, ...)`, one per line.
fn schema_summary(db: &Database) -> anyhow::Result<String> {
    let mut lines = Vec::new();
    for table in db.tables()? {
        let cols = db
            .columns(&table)?
            .into_iter()
            .map(|c| format!("{} {}", c.name, c.sql_type))
            .collect::<Vec<_>>()
            .join(", ");
        lines.push(format!("{table}({cols})"));
    }
    Ok(lines.join("\n"))
}

/// Strip Markdown code fences and surrounding whitespace from a model reply.
fn clean_sql(reply: &str) -> String {
    let trimmed = reply.trim();
    let unfenced = trimmed
        .strip_prefix("```sql")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|rest| rest.trim_end().trim_end_matches("```"))
        .unwrap_or(trimmed);
    unfenced.trim().to_string()
}

/// The first blocked keyword appearing as a whole word in `sql`.
fn blocked_keyword<'a>(sql: &str, blocked: &'a [String]) -> Option<&'a str> {
    let words: Vec<&str> = sql
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .filter(|w| !w.is_empty())
        .collect();
    blocked
        .iter()
        .find(|kw| words.iter().any(|w| w.eq_ignore_ascii_case(kw)))
        .map(String::as_str)
}

// ── query_database ──────────────────────────────────────────────────

pub struct QueryDatabaseTool {
    provider: Arc<dyn LlmProvider>,
    model: String,
    db: Arc<Database>,
    config: DatabaseConfig,
}

impl QueryDatabaseTool {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        model: &str,
        db: Arc<Database>,
        config: DatabaseConfig,
    ) -> Self {
        Self {
            provider,
            model: model.to_string(),
            db,
            config,
        }
    }

    async fn generate_sql(&self, question: &str) -> anyhow::Result<String> {
        let schema = schema_summary(&self.db)?;
        let prompt = format!(
            "Generate only the SQL query for: {question}\n\
             Rules:\n\
             - Generate only a single SQLite query without any explanation\n\
             - The query must only read data\n\
             - Do not use DROP, DELETE, TRUNCATE, UPDATE, INSERT or ALTER\n\n\
             Schema:\n{schema}"
        );
        let response = self
            .provider
            .chat(
                &[ChatMessage::user(&prompt)],
                &[],
                Some(&self.model),
                SQL_MAX_TOKENS,
                0.0,
            )
            .await
            .context("model call failed while generating SQL")?;
        Ok(clean_sql(response.text()))
    }

    fn run(&self, sql: &str) -> Value {
        if let Some(kw) = blocked_keyword(sql, &self.config.blocked_keywords) {
            warn!(keyword = kw, "Refusing generated SQL");
            return json!({
                "success": false,
                "sql_query": sql,
                "results": [],
                "error": "Query contains potentially dangerous operations",
            });
        }

        match self.db.query(sql, self.config.max_rows) {
            Ok(rows) => json!({
                "success": true,
                "sql_query": sql,
                "results": rows.rows,
                "truncated": rows.truncated,
                "error": Value::Null,
            }),
            Err(e) => json!({
                "success": false,
                "sql_query": sql,
                "results": [],
                "error": e.to_string(),
            }),
        }
    }
}

#[async_trait]
impl Tool for QueryDatabaseTool {
    fn name(&self) -> &str {
        "query_database"
    }

    fn description(&self) -> &str {
        "Answer a question about the database. The question is turned into a read-only SQL query, \
         which is run and returned as JSON together with the generated SQL."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "natural_language_query": {
                    "type": "string",
                    "description": "The question to answer, in plain language"
                }
            },
            "required": ["natural_language_query"]
        })
    }

    async fn execute(&self, args: HashMap<String, Value>) -> anyhow::Result<String> {
        let question = str_arg(&args, "natural_language_query")?;
        let sql = self.generate_sql(question).await?;
        if sql.is_empty() {
            anyhow::bail!("model did not produce a SQL query");
        }
        debug!(%sql, "Generated SQL");

        let result = self.run(&sql);
        Ok(serde_json::to_string_pretty(&result)?)
    }
}

// ── populate_database ───────────────────────────────────────────────

pub struct PopulateDatabaseTool {
    db: Arc<Database>,
}

impl PopulateDatabaseTool {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Tool for PopulateDatabaseTool {
    fn name(&self) -> &str {
        "populate_database"
    }

    fn description(&self) -> &str {
        "Fill a database table with randomly generated rows that match its column types."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "table": {
                    "type": "string",
                    "description": "Name of the table to populate"
                },
                "rows": {
                    "type": "integer",
                    "description": "Number of rows to generate (default 10)"
                }
            },
            "required": ["table"]
        })
    }

    async fn execute(&self, args: HashMap<String, Value>) -> anyhow::Result<String> {
        let table = str_arg(&args, "table")?;
        let rows = opt_u64_arg(&args, "rows").unwrap_or(10);
        if rows > MAX_POPULATE_ROWS {
            anyhow::bail!("rows must be at most {}", MAX_POPULATE_ROWS);
        }

        let report = Populator::new(&self.db).populate_table(table, rows as usize)?;
        info!(table, rows = report.rows, "populate_database finished");
        Ok(format!("Inserted {} rows into {}.", report.rows, report.table))
    }
}

// ── list_tables ─────────────────────────────────────────────────────

pub struct ListTablesTool {
    db: Arc<Database>,
}

impl ListTablesTool {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Tool for ListTablesTool {
    fn name(&self) -> &str {
        "list_tables"
    }

    fn description(&self) -> &str {
        "List the tables in the database together with their columns and types."
    }

    fn parameters(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, _args: HashMap<String, Value>) -> anyhow::Result<String> {
        let mut tables = serde_json::Map::new();
        for table in self.db.tables()? {
            let columns = self.db.columns(&table)?;
            tables.insert(table, serde_json::to_value(columns)?);
        }
        if tables.is_empty() {
            return Ok("The database has no tables.".into());
        }
        Ok(serde_json::to_string_pretty(&tables)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::testing::ScriptedProvider;

    fn db() -> Arc<Database> {
        let db = Database::in_memory().unwrap();
        db.execute_batch(
            "CREATE TABLE products (id INTEGER PRIMARY KEY, name TEXT NOT NULL, price REAL);
             INSERT INTO products (name, price) VALUES ('pen', 1.5), ('book', 12.0);",
        )
        .unwrap();
        Arc::new(db)
    }

    fn query_tool(reply: &str, db: Arc<Database>) -> (QueryDatabaseTool, Arc<ScriptedProvider>) {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(ScriptedProvider::text(reply))]));
        let tool = QueryDatabaseTool::new(provider.clone(), "m", db, DatabaseConfig::default());
        (tool, provider)
    }

    fn question(q: &str) -> HashMap<String, Value> {
        HashMap::from([("natural_language_query".to_string(), json!(q))])
    }

    #[test]
    fn test_clean_sql_and_keywords() {
        assert_eq!(clean_sql("```sql\nSELECT 1;\n```"), "SELECT 1;");
        assert_eq!(clean_sql("  SELECT 2 "), "SELECT 2");

        let blocked = DatabaseConfig::default().blocked_keywords;
        assert_eq!(blocked_keyword("drop table x", &blocked), Some("DROP"));
        assert_eq!(blocked_keyword("SELECT updated_at FROM t", &blocked), None);
    }

    #[tokio::test]
    async fn test_query_database_runs_generated_sql() {
        let (tool, provider) =
            query_tool("```sql\nSELECT name FROM products ORDER BY price DESC\n```", db());
        let out = tool.execute(question("most expensive product?")).await.unwrap();
        let v: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(v["success"], true);
        assert_eq!(v["sql_query"], "SELECT name FROM products ORDER BY price DESC");
        assert_eq!(v["results"][0]["name"], "book");

        let seen = provider.seen.lock().unwrap();
        let prompt = seen[0][0].content_as_str().unwrap();
        assert!(prompt.contains("products(id INTEGER, name TEXT, price REAL)"));
    }

    #[tokio::test]
    async fn test_query_database_blocks_writes() {
        let db = db();
        let (tool, _) = query_tool("DELETE FROM products", db.clone());
        let out = tool.execute(question("remove everything")).await.unwrap();
        let v: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(v["success"], false);
        assert_eq!(v["error"], "Query contains potentially dangerous operations");
        assert_eq!(db.query("SELECT * FROM products", 10).unwrap().rows.len(), 2);
    }

    #[tokio::test]
    async fn test_query_database_reports_sql_errors() {
        let (tool, _) = query_tool("SELECT nope FROM products", db());
        let out = tool.execute(question("?")).await.unwrap();
        let v: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(v["success"], false);
        assert!(v["error"].as_str().unwrap().contains("nope"));
    }

    #[tokio::test]
    async fn test_populate_and_list_tables() {
        let db = db();
        let tool = PopulateDatabaseTool::new(db.clone());
        let args = HashMap::from([
            ("table".to_string(), json!("products")),
            ("rows".to_string(), json!(5)),
        ]);
        let out = tool.execute(args).await.unwrap();
        assert_eq!(out, "Inserted 5 rows into products.");
        assert_eq!(db.query("SELECT * FROM products", 100).unwrap().rows.len(), 7);

        let listing = ListTablesTool::new(db).execute(HashMap::new()).await.unwrap();
        let v: Value = serde_json::from_str(&listing).unwrap();
        assert_eq!(v["products"][1]["name"], "name");
        assert_eq!(v["products"][1]["nullable"], false);
    }
}
