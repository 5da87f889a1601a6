pub const SCHEMA: &[&str] = &[
    r#"
CREATE TABLE IF NOT EXISTS vehicles (
    id uuid PRIMARY KEY,
    imei text NOT NULL UNIQUE,
    name text NOT NULL,
    type text NOT NULL,
    created_at timestamptz NOT NULL DEFAULT NOW()
);
"#,
    r#"
CREATE TABLE IF NOT EXISTS rides (
    id uuid PRIMARY KEY,
    vehicle_id uuid NOT NULL REFERENCES vehicles (id),
    started_at timestamptz NOT NULL,
    ended_at timestamptz
);
"#,
    r#"
CREATE TABLE IF NOT EXISTS pings (
    id uuid PRIMARY KEY,
    vehicle_id uuid NOT NULL REFERENCES vehicles (id),
    ride_id uuid NOT NULL REFERENCES rides (id),
    ts timestamptz NOT NULL,
    lat float8 NOT NULL,
    lon float8 NOT NULL,
    speed_kph float8,
    course float8,
    raw text,
    received_at timestamptz NOT NULL DEFAULT clock_timestamp()
);
"#,
    r#"
CREATE INDEX IF NOT EXISTS pings_vehicle_received_idx ON pings (vehicle_id, received_at DESC);
"#,
];

// The no-op update makes RETURNING yield the existing row on conflict.
pub const UPSERT_VEHICLE: &str = r#"
INSERT INTO vehicles (id, imei, name, type)
VALUES ($1, $2, $3, $4)
ON CONFLICT (imei) DO UPDATE SET imei = EXCLUDED.imei
RETURNING id, imei, name, type;
"#;

pub const UPSERT_RIDE: &str = r#"
INSERT INTO rides (id, vehicle_id, started_at, ended_at)
VALUES ($1, $2, $3, $4)
ON CONFLICT (id) DO UPDATE
SET started_at = LEAST(rides.started_at, EXCLUDED.started_at),
    ended_at = GREATEST(EXCLUDED.ended_at, rides.ended_at);
"#;

pub const INSERT_PING: &str = r#"
INSERT INTO pings (id, vehicle_id, ride_id, ts, lat, lon, speed_kph, course, raw)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9);
"#;

pub const SELECT_LAST_PING: &str = r#"
SELECT p.ts, p.ride_id, r.started_at AS ride_started_at
FROM pings p
JOIN rides r ON r.id = p.ride_id
WHERE p.vehicle_id = $1
ORDER BY p.received_at DESC
LIMIT 1;
"#;
