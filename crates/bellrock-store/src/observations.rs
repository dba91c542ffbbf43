use chrono::{DateTime, Utc};
use rusqlite::params;

use bellrock_shared::{Aid, Uid};

use crate::database::Database;
use crate::error::Result;
use crate::models::{Location, Observation, ObservationBatch};

impl Database {
    pub fn add_observation(&self, observation: &Observation) -> Result<()> {
        self.conn().execute(
            "INSERT INTO observations (observer_uid, aid, resolved_uid, ts, lat, lon, location_name)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            observation_params(observation),
        )?;
        self.commit_now()
    }

    /// Persist a whole batch in one transaction: either every observation in
    /// the batch lands, or none of them do.
    pub fn add_observations(&self, batch: &ObservationBatch) -> Result<()> {
        self.bulk(|conn| {
            let mut stmt = conn.prepare(
                "INSERT INTO observations (observer_uid, aid, resolved_uid, ts, lat, lon, location_name)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for observation in &batch.observations {
                stmt.execute(observation_params(observation))?;
            }
            Ok(())
        })
    }

    /// Delete the stored rows matching this observation's identity (observer,
    /// AID, timestamp).
    pub fn delete_observation(&self, observation: &Observation) -> Result<()> {
        self.conn().execute(
            "DELETE FROM observations WHERE observer_uid = ?1 AND aid = ?2 AND ts = ?3",
            params![
                observation.observer.to_hex(),
                observation.aid.to_hex(),
                observation.time.timestamp_millis(),
            ],
        )?;
        self.commit_now()
    }

    /// All observations recorded by `observer`, oldest first.
    pub fn observations_by_observer(&self, observer: &Uid) -> Result<Vec<Observation>> {
        let mut stmt = self.conn().prepare(
            "SELECT observer_uid, aid, resolved_uid, ts, lat, lon, location_name
             FROM observations
             WHERE observer_uid = ?1
             ORDER BY ts ASC",
        )?;
        let rows = stmt.query_map(params![observer.to_hex()], row_to_observation)?;

        let mut observations = Vec::new();
        for row in rows {
            observations.push(row?);
        }
        Ok(observations)
    }
}

type ObservationParams = (String, String, Option<String>, i64, f64, f64, Option<String>);

fn observation_params(observation: &Observation) -> ObservationParams {
    (
        observation.observer.to_hex(),
        observation.aid.to_hex(),
        observation.resolved.as_ref().map(Uid::to_hex),
        observation.time.timestamp_millis(),
        observation.location.lat,
        observation.location.lon,
        observation.location.name.clone(),
    )
}

fn row_to_observation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Observation> {
    let observer_hex: String = row.get(0)?;
    let aid_hex: String = row.get(1)?;
    let resolved_hex: Option<String> = row.get(2)?;
    let ts: i64 = row.get(3)?;
    let lat: f64 = row.get(4)?;
    let lon: f64 = row.get(5)?;
    let name: Option<String> = row.get(6)?;

    let observer = Uid::from_hex(&observer_hex).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let aid = Aid::from_hex(&aid_hex).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let resolved = resolved_hex
        .map(|hex| {
            Uid::from_hex(&hex).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    2,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })
        })
        .transpose()?;

    let time: DateTime<Utc> = DateTime::from_timestamp_millis(ts).ok_or_else(|| {
        rusqlite::Error::IntegralValueOutOfRange(3, ts)
    })?;

    Ok(Observation {
        observer,
        aid,
        resolved,
        time,
        location: Location { lat, lon, name },
    })
}
