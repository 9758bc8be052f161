//! Features queried from a PostGIS table.
//!
//! The table's geometries must already be in EPSG:3857 web mercator.

use futures::TryStreamExt;
use serde::Deserialize;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{query, Row};
use tokio::runtime::{Builder, Runtime};
use tracing::{debug, info, warn};

use crate::envelope::Envelope;
use crate::error::{Error, Result};
use crate::feature::Feature;
use crate::geojson::{attributes_from, JsonGeometry, Projection};
use crate::source::{decompose, DataSource, DataSourceId, SourceIdentity};

fn default_geometry_column() -> String {
    String::from("geometry")
}

fn default_id_column() -> String {
    String::from("id")
}

fn default_max_connections() -> u32 {
    4
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct PostgisSettings {
    /// A `postgres://` connection URL.
    pub url: String,
    /// Table (or parenthesised subquery with an alias) to read from, used verbatim.
    pub table: String,
    #[serde(default = "default_geometry_column")]
    pub geometry_column: String,
    /// Integer column identifying rows. It becomes the local part of feature ids.
    #[serde(default = "default_id_column")]
    pub id_column: String,
    /// Columns copied into feature attributes.
    #[serde(default)]
    pub attributes: Vec<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// The query for the rows whose geometry's bounding box intersects the envelope given
/// as parameters `$1..$4` (min x, min y, max x, max y).
fn envelope_query_sql(settings: &PostgisSettings) -> String {
    let geometry = quote_ident(&settings.geometry_column);
    let properties: Vec<String> = settings
        .attributes
        .iter()
        .map(|column| format!("{}, {}", quote_literal(column), quote_ident(column)))
        .collect();

    format!(
        "SELECT {id}::bigint AS id, ST_AsGeoJSON({geom}) AS geometry, json_build_object({props})::text AS properties \
         FROM {table} \
         WHERE {geom} && ST_MakeEnvelope($1, $2, $3, $4, 3857)",
        id = quote_ident(&settings.id_column),
        geom = geometry,
        props = properties.join(", "),
        table = settings.table,
    )
}

/// The local part of a row's feature id. Ids that fit in 32 bits are kept; others
/// (negative OSM relation ids, 64-bit ids) are hashed. Two rows sharing a hashed id only
/// share label placement.
fn local_id(row_id: i64) -> u32 {
    match u32::try_from(row_id) {
        Ok(id) => id,
        Err(_) => ((row_id as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15) >> 32) as u32,
    }
}

/// A data source backed by a PostgreSQL connection pool.
///
/// Renders are synchronous, so the source drives its queries on a small runtime of its
/// own. It must not be used from inside another tokio runtime.
pub struct PostgisSource {
    identity: SourceIdentity,
    pool: PgPool,
    runtime: Runtime,
    sql: String,
}

impl PostgisSource {
    pub fn connect(settings: &PostgisSettings) -> Result<PostgisSource> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()?;
        let pool = runtime.block_on(
            PgPoolOptions::new()
                .max_connections(settings.max_connections)
                .connect(&settings.url),
        )?;
        let identity = SourceIdentity::new();
        info!(source = %identity.id(), table = %settings.table, "connected to PostGIS");

        Ok(PostgisSource {
            identity,
            pool,
            runtime,
            sql: envelope_query_sql(settings),
        })
    }

    fn features_from_row(&self, row: &PgRow) -> Result<Vec<Feature>> {
        let row_id: i64 = row.try_get("id")?;
        let local = local_id(row_id);
        let geometry: Option<String> = row.try_get("geometry")?;
        let properties: Option<String> = row.try_get("properties")?;

        let Some(geometry) = geometry else {
            return Ok(Vec::new());
        };
        let geometry = match serde_json::from_str::<JsonGeometry>(&geometry)
            .map_err(Error::from)
            .and_then(|g| g.to_geo(Projection::Mercator))
        {
            Ok(geometry) => geometry,
            Err(e) => {
                warn!(source = %self.identity.id(), row_id, "skipping row: {}", e);
                return Ok(Vec::new());
            }
        };
        let properties = match properties {
            Some(text) => serde_json::from_str(&text)?,
            None => None,
        };
        let attributes = attributes_from(properties);

        // Parts of one row share its id.
        let id = self.identity.feature_id_for(local);
        Ok(decompose(geometry)
            .into_iter()
            .map(|part| Feature {
                id,
                geometry: part,
                attributes: attributes.clone(),
            })
            .collect())
    }
}

impl DataSource for PostgisSource {
    fn id(&self) -> DataSourceId {
        self.identity.id()
    }

    fn fetch(&self, envelope: &Envelope) -> Result<Vec<Feature>> {
        let features = self.runtime.block_on(async {
            let mut rows = query(&self.sql)
                .bind(envelope.min_x)
                .bind(envelope.min_y)
                .bind(envelope.max_x)
                .bind(envelope.max_y)
                .fetch(&self.pool);

            let mut features = Vec::new();
            while let Some(row) = rows.try_next().await? {
                features.extend(self.features_from_row(&row)?);
            }
            Ok::<_, Error>(features)
        })?;
        debug!(source = %self.identity.id(), count = features.len(), "fetched rows");
        Ok(features)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> PostgisSettings {
        PostgisSettings {
            url: String::from("postgres://localhost/osm"),
            table: String::from("planet_osm_line"),
            geometry_column: String::from("way"),
            id_column: String::from("osm_id"),
            attributes: vec![String::from("name"), String::from("highway")],
            max_connections: 4,
        }
    }

    #[test]
    fn test_generate_envelope_query_sql() {
        let sql = envelope_query_sql(&settings());

        assert!(sql.starts_with("SELECT \"osm_id\"::bigint AS id, ST_AsGeoJSON(\"way\") AS geometry"));
        assert!(sql.contains("json_build_object('name', \"name\", 'highway', \"highway\")::text AS properties"));
        assert!(sql.contains("FROM planet_osm_line"));
        assert!(sql.ends_with("WHERE \"way\" && ST_MakeEnvelope($1, $2, $3, $4, 3857)"));
    }

    #[test]
    fn test_identifiers_are_quoted() {
        let mut settings = settings();
        settings.attributes = vec![String::from("it's \"odd\"")];

        let sql = envelope_query_sql(&settings);

        assert!(sql.contains("json_build_object('it''s \"odd\"', \"it's \"\"odd\"\"\")"));
    }

    #[test]
    fn test_row_ids_outside_32_bits_are_hashed() {
        assert_eq!(local_id(0), 0);
        assert_eq!(local_id(42), 42);
        assert_eq!(local_id(i64::from(u32::MAX)), u32::MAX);

        let relation = local_id(-123);
        assert_eq!(relation, local_id(-123));
        assert_eq!(relation, 4_216_882_143);
        assert_ne!(relation, local_id(-124));
        assert_ne!(local_id(1 << 32), local_id((1 << 32) + 5));
    }

    #[test]
    fn test_parse_settings_with_defaults() {
        let settings: PostgisSettings =
            serde_yaml::from_str("url: postgres://localhost/osm\ntable: roads\n").unwrap();

        assert_eq!(settings.geometry_column, "geometry");
        assert_eq!(settings.id_column, "id");
        assert!(settings.attributes.is_empty());
        assert_eq!(settings.max_connections, 4);
    }
}
