use std::{path::Path, sync::Arc};

use gnss2jsonl::{
    converter::Converter,
    error::{ConversionError, FallbackError, JobError},
    extractor::{Extractor, read_canonical},
    fallback::client::{Disabled, ScriptedGenerator},
    input::RawInput,
    job::{JobRecord, Outcome, Stage, pipeline::Pipeline},
    record::Scalar,
    settings::{ConverterSettings, Settings},
};

use serde_json::Value;

const GGA: &str =
    "$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47,1700000000000";

const RINEX: &str = "data/ESBC00DNK_R_20233182213_01M_30S_MO.rnx";

fn write(dir: &Path, name: &str, content: &str) -> RawInput {
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    RawInput::new(path)
}

fn read_jsonl(path: &Path) -> Vec<Value> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

#[test]
fn nmea_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let input = write(dir.path(), "drive.nmea", &format!("{}\n", GGA));

    let canonical = input.canonical_artifact(None);
    let conversion = Converter::default().convert(&input, &canonical).unwrap();

    assert_eq!(conversion.records.len(), 1);
    let record = &conversion.records[0];
    assert_eq!(record.sentence_type.as_deref(), Some("GGA"));
    assert_eq!(record.timestamp_ms, Some(1_700_000_000_000));

    let location = input.location_artifact(None);
    Extractor::default()
        .extract(&read_canonical(&canonical).unwrap(), &location)
        .unwrap();

    let records = read_jsonl(&location);
    assert_eq!(records.len(), 1);

    let record = &records[0];
    assert_eq!(record["timestamp_ms"], 1_700_000_000_000_i64);
    assert!((record["latitude"].as_f64().unwrap() - 48.1173).abs() < 1.0E-4);
    assert!((record["longitude"].as_f64().unwrap() - 11.5167).abs() < 1.0E-4);
    assert_eq!(record["altitude"], 545.4);
    assert_eq!(record["num_satellites"], 8);
    assert_eq!(record["hdop"], 0.9);
    assert_eq!(record["quality"], 1);
}

#[test]
fn southern_western_hemispheres() {
    let dir = tempfile::tempdir().unwrap();
    let input = write(
        dir.path(),
        "south.nmea",
        "$GPGGA,123519,4807.038,S,01131.000,W,1,08,0.9,545.4,M,46.9,M,,*48,1700000000000\n",
    );

    let canonical = input.canonical_artifact(None);
    let conversion = Converter::default().convert(&input, &canonical).unwrap();

    let location = input.location_artifact(None);
    let locations = Extractor::default()
        .extract(&conversion.records, &location)
        .unwrap();

    assert!(locations[0].latitude.unwrap() < 0.0);
    assert!(locations[0].longitude.unwrap() < 0.0);
}

#[test]
fn extraction_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let content = format!(
        "{}\n$GPRMC,221320,A,4807.038,N,01131.000,E,022.4,084.4,141123,003.1,W*6C\n{}\n",
        GGA, GGA
    );
    let input = write(dir.path(), "drive.nmea", &content);

    let canonical = input.canonical_artifact(None);
    Converter::default().convert(&input, &canonical).unwrap();
    let records = read_canonical(&canonical).unwrap();

    let first = dir.path().join("first.location.jsonl");
    let second = dir.path().join("second.location.jsonl");

    Extractor::default().extract(&records, &first).unwrap();
    Extractor::default().extract(&records, &second).unwrap();

    assert_eq!(
        std::fs::read(&first).unwrap(),
        std::fs::read(&second).unwrap()
    );
}

#[test]
fn validity_gate_boundaries() {
    let dir = tempfile::tempdir().unwrap();
    let untimed = "$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47";

    let half = [GGA, untimed].join("\n");
    let input = write(dir.path(), "half.nmea", &half);
    assert!(
        Converter::default()
            .convert(&input, &input.canonical_artifact(None))
            .is_ok()
    );

    let mut lines = vec![GGA; 49];
    lines.extend(vec![untimed; 51]);
    let input = write(dir.path(), "below.nmea", &lines.join("\n"));

    match Converter::default().convert(&input, &input.canonical_artifact(None)) {
        Err(ConversionError::ValidityGate { valid: 49, total: 100 }) => {},
        other => panic!("unexpected {:?}", other),
    }

    let settings = ConverterSettings {
        threshold: 0.4,
        ..Default::default()
    };
    assert!(
        Converter::new(settings)
            .convert(&input, &input.canonical_artifact(None))
            .is_ok()
    );
}

#[test]
fn rinex_observations() {
    let input = RawInput::new(RINEX);
    let dir = tempfile::tempdir().unwrap();
    let canonical = dir.path().join("rinex.jsonl");

    let conversion = Converter::default().convert(&input, &canonical).unwrap();
    assert_eq!(conversion.attempt.source, "rinex");
    assert_eq!(conversion.records.len(), 4);

    // 2023-11-14T22:13:20 GPST is 22:13:02 UTC
    let expected = 1_699_999_982_000_i64;

    let g01 = &conversion.records[0];
    assert_eq!(g01.timestamp_ms, Some(expected));
    assert_eq!(
        g01.get("satellite_system"),
        Some(&Scalar::Text("G".to_string()))
    );
    assert_eq!(
        g01.get("satellite_number"),
        Some(&Scalar::Text("01".to_string()))
    );
    assert_eq!(g01.get("C1"), Some(&Scalar::Float(20_000_000.0)));
    assert_eq!(g01.get("S1"), Some(&Scalar::Float(45.0)));

    assert!(
        conversion
            .records
            .iter()
            .any(|r| r.timestamp_ms == Some(expected + 30_000))
    );

    let location = dir.path().join("rinex.location.jsonl");
    let locations = Extractor::default()
        .extract(&conversion.records, &location)
        .unwrap();

    assert_eq!(locations.len(), 4);
    let e11 = locations
        .iter()
        .find(|l| l.satellite_system.as_deref() == Some("E"))
        .unwrap();
    assert_eq!(e11.satellite_number.as_deref(), Some("11"));
    assert_eq!(e11.pseudorange, Some(23_000_000.0));
    assert_eq!(e11.signal_strength, Some(38.0));
    assert!(e11.carrier_phase.is_none());
}

#[test]
fn altitude_out_of_bounds_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let input = write(
        dir.path(),
        "high.nmea",
        &format!(
            "$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,15000,M,46.9,M,,*5D,1700000000000\n{}\n",
            GGA
        ),
    );

    let pipeline = Pipeline::new(&Settings::default(), Arc::new(Disabled));
    let mut job = JobRecord::new(input.filename());
    let location = pipeline.process(&mut job, &input).unwrap();

    let records = read_jsonl(&location);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["altitude"], 545.4);
}

#[test]
fn unknown_format_recovered() {
    let dir = tempfile::tempdir().unwrap();
    let input = write(
        dir.path(),
        "vendor.log",
        "# vendor log\nFIX|1700000000|4807.038|N|01131.000|E|545.4\nFIX|1700000001|4807.040|N|01131.002|E|545.6\n",
    );

    let program = r#"Sure, here is the converter:
```json
{
  "skip": ["^#"],
  "rules": [{
    "match": "^FIX\\|",
    "split": "|",
    "fields": {
      "timestamp_ms": { "from": 1, "as": "unix_seconds" },
      "latitude": { "from": 2, "as": "nmea_latitude", "hemisphere": 3 },
      "longitude": { "from": 4, "as": "nmea_longitude", "hemisphere": 5 },
      "altitude": { "from": 6, "as": "float" }
    }
  }]
}
```"#;

    let generator = Arc::new(ScriptedGenerator::new().reply(program));
    let pipeline = Pipeline::new(&Settings::default(), generator.clone());
    let mut job = JobRecord::new(input.filename());

    let location = pipeline.process(&mut job, &input).unwrap();

    assert_eq!(job.stage(), Stage::Succeeded);
    assert_eq!(
        job.outcome(),
        Some(&Outcome::Success("vendor.location.jsonl".to_string()))
    );
    assert_eq!(generator.requests(), 1);

    let records = read_jsonl(&location);
    assert_eq!(records.len(), 2);
    assert_eq!(records[1]["timestamp_ms"], 1_700_000_001_000_i64);
    assert!((records[0]["latitude"].as_f64().unwrap() - 48.1173).abs() < 1.0E-4);

    // the generation request carried the sample and both artifacts
    let conversation = generator.conversation(0).unwrap();
    assert!(conversation[1].content.contains("FIX|1700000000"));
    assert!(conversation[1].content.contains("vendor.jsonl"));
}

#[test]
fn fallback_exhaustion_fails_job() {
    let dir = tempfile::tempdir().unwrap();
    let input = write(dir.path(), "vendor.log", "FIX|1700000000|north|east\n");

    // compiles, runs, never satisfies the contract
    let program = r#"```json
{
  "rules": [{
    "split": "|",
    "fields": { "name": { "from": 2, "as": "text" } }
  }]
}
```"#;

    let generator = Arc::new(ScriptedGenerator::new().reply(program));
    let mut settings = Settings::default();
    settings.fallback.backoff = std::time::Duration::from_millis(1);

    let pipeline = Pipeline::new(&settings, generator.clone());
    let mut job = JobRecord::new(input.filename());

    match pipeline.process(&mut job, &input) {
        Err(JobError::Fallback {
            stage: Stage::ConvertingFallback,
            source: FallbackError::MaxAttemptsExceeded { attempts: 10, .. },
        }) => {},
        other => panic!("unexpected {:?}", other),
    }

    assert_eq!(job.stage(), Stage::Failed);
    assert_eq!(generator.requests(), 10);

    let failures = job
        .log()
        .iter()
        .filter(|msg| msg.starts_with("Fallback attempt"))
        .count();
    assert_eq!(failures, 10);

    let status = job.status();
    let result = status.result.unwrap();
    assert!(result.message.unwrap().contains("10 attempts"));
    assert!(!input.canonical_artifact(None).exists());
}
