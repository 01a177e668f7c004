//! Response Decoder
//!
//! Streams Prometheus API envelopes into typed results. Samples are decoded
//! one series at a time straight from the reader; no intermediate JSON tree
//! is built, and the result body of an error envelope or of an unexpected
//! result type is skipped rather than decoded.

use crate::domain::entities::{Labels, MetricMetadata, Payload, QueryStats, RangeSeries, Sample, SamplePair};
use crate::domain::errors::QueryError;
use crate::domain::query::Query;
use crate::domain::value_objects::ErrorType;
use serde::de::{DeserializeSeed, Deserializer, IgnoredAny, MapAccess, Visitor};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::io::Read;
use std::marker::PhantomData;

/// Metric name to metadata entries, as returned by `/api/v1/metadata`.
pub type MetadataMap = HashMap<String, Vec<MetricMetadata>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResultType {
    Vector,
    Matrix,
}

impl ResultType {
    fn as_str(&self) -> &'static str {
        match self {
            ResultType::Vector => "vector",
            ResultType::Matrix => "matrix",
        }
    }
}

struct Envelope<D> {
    status: String,
    error_type: String,
    error: String,
    data: Option<D>,
}

struct EnvelopeSeed<S> {
    data: S,
}

impl<'de, S: DeserializeSeed<'de>> DeserializeSeed<'de> for EnvelopeSeed<S> {
    type Value = Envelope<S::Value>;

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        deserializer.deserialize_map(EnvelopeVisitor { data: self.data })
    }
}

struct EnvelopeVisitor<S> {
    data: S,
}

impl<'de, S: DeserializeSeed<'de>> Visitor<'de> for EnvelopeVisitor<S> {
    type Value = Envelope<S::Value>;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a query API response object")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        let mut seed = Some(self.data);
        let mut envelope = Envelope {
            status: String::new(),
            error_type: String::new(),
            error: String::new(),
            data: None,
        };

        while let Some(key) = map.next_key::<String>()? {
            match key.as_str() {
                "status" => envelope.status = map.next_value::<Option<String>>()?.unwrap_or_default(),
                "errorType" => {
                    envelope.error_type = map.next_value::<Option<String>>()?.unwrap_or_default()
                }
                "error" => envelope.error = map.next_value::<Option<String>>()?.unwrap_or_default(),
                "data" => {
                    let wanted = envelope.status.is_empty() || envelope.status == "success";
                    match seed.take() {
                        Some(seed) if wanted => envelope.data = Some(map.next_value_seed(seed)?),
                        _ => {
                            map.next_value::<IgnoredAny>()?;
                        }
                    }
                }
                _ => {
                    map.next_value::<IgnoredAny>()?;
                }
            }
        }

        Ok(envelope)
    }
}

#[derive(Deserialize)]
struct RawPoint(f64, String);

impl RawPoint {
    fn into_pair(self) -> Result<SamplePair, QueryError> {
        let value = self.1.parse::<f64>().map_err(|_| {
            QueryError::bad_response(format!("invalid sample value {:?}", self.1))
        })?;
        Ok(SamplePair {
            timestamp: self.0,
            value,
        })
    }
}

#[derive(Deserialize)]
struct RawSeries {
    #[serde(default)]
    metric: Labels,
    #[serde(default)]
    value: Option<RawPoint>,
    #[serde(default)]
    values: Vec<RawPoint>,
}

struct QueryData {
    result_type: String,
    series: Vec<RawSeries>,
    stats: Option<QueryStats>,
}

struct QueryDataSeed {
    expected: ResultType,
}

impl<'de> DeserializeSeed<'de> for QueryDataSeed {
    type Value = QueryData;

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        deserializer.deserialize_map(self)
    }
}

impl<'de> Visitor<'de> for QueryDataSeed {
    type Value = QueryData;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a query result object")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        let mut data = QueryData {
            result_type: String::new(),
            series: Vec::new(),
            stats: None,
        };

        while let Some(key) = map.next_key::<String>()? {
            match key.as_str() {
                "resultType" => data.result_type = map.next_value()?,
                "result" => {
                    if data.result_type.is_empty() || data.result_type == self.expected.as_str() {
                        data.series = map.next_value()?;
                    } else {
                        map.next_value::<IgnoredAny>()?;
                    }
                }
                "stats" => data.stats = map.next_value()?,
                _ => {
                    map.next_value::<IgnoredAny>()?;
                }
            }
        }

        Ok(data)
    }
}

/// Read whatever is left so the connection can be reused.
fn drain<R: Read>(reader: &mut R) {
    let _ = std::io::copy(reader, &mut std::io::sink());
}

fn decode_envelope<R, S, V>(reader: &mut R, seed: S) -> Result<V, QueryError>
where
    R: Read,
    S: for<'de> DeserializeSeed<'de, Value = V>,
{
    let decoded = {
        let mut de = serde_json::Deserializer::from_reader(&mut *reader);
        EnvelopeSeed { data: seed }
            .deserialize(&mut de)
            .and_then(|envelope| de.end().map(|_| envelope))
    };
    drain(reader);

    let envelope =
        decoded.map_err(|e| QueryError::bad_response(format!("JSON parse error: {}", e)))?;

    if envelope.status.is_empty() {
        return Err(QueryError::bad_response("missing response status"));
    }
    if envelope.status != "success" {
        return Err(QueryError::Api {
            status: envelope.status,
            error_type: ErrorType::from_wire(&envelope.error_type),
            message: envelope.error,
        });
    }

    envelope
        .data
        .ok_or_else(|| QueryError::bad_response("missing data in response"))
}

fn decode_query_data<R: Read>(
    mut reader: R,
    expected: ResultType,
) -> Result<(Vec<RawSeries>, Option<QueryStats>), QueryError> {
    let data = decode_envelope(&mut reader, QueryDataSeed { expected })?;
    if data.result_type != expected.as_str() {
        return Err(QueryError::bad_response(format!(
            "invalid result type, expected {}, got {}",
            expected.as_str(),
            data.result_type
        )));
    }
    Ok((data.series, data.stats))
}

/// Decode an instant query response.
pub fn decode_vector<R: Read>(reader: R) -> Result<(Vec<Sample>, Option<QueryStats>), QueryError> {
    let (series, stats) = decode_query_data(reader, ResultType::Vector)?;
    let mut samples = Vec::with_capacity(series.len());
    for s in series {
        // Native histogram samples carry no scalar value.
        let Some(point) = s.value else {
            continue;
        };
        let pair = point.into_pair()?;
        samples.push(Sample {
            metric: s.metric,
            timestamp: pair.timestamp,
            value: pair.value,
        });
    }
    Ok((samples, stats))
}

/// Decode a range query response.
pub fn decode_matrix<R: Read>(
    reader: R,
) -> Result<(Vec<RangeSeries>, Option<QueryStats>), QueryError> {
    let (series, stats) = decode_query_data(reader, ResultType::Matrix)?;
    let mut out = Vec::with_capacity(series.len());
    for s in series {
        let values = s
            .values
            .into_iter()
            .map(RawPoint::into_pair)
            .collect::<Result<Vec<_>, _>>()?;
        out.push(RangeSeries {
            metric: s.metric,
            values,
        });
    }
    Ok((out, stats))
}

/// Decode a metadata response.
pub fn decode_metadata<R: Read>(mut reader: R) -> Result<MetadataMap, QueryError> {
    decode_envelope(&mut reader, PhantomData::<MetadataMap>)
}

/// Decode the response body for `query`.
pub fn decode_payload<R: Read>(
    query: &Query,
    reader: R,
) -> Result<(Payload, Option<QueryStats>), QueryError> {
    match query {
        Query::Instant { .. } => decode_vector(reader).map(|(s, stats)| (Payload::Vector(s), stats)),
        Query::Range { .. } => decode_matrix(reader).map(|(s, stats)| (Payload::Matrix(s), stats)),
        Query::Metadata { metric } => decode_metadata(reader).map(|mut m| {
            (Payload::Metadata(m.remove(metric).unwrap_or_default()), None)
        }),
    }
}

/// Try to read an API error envelope from a response body.
///
/// Returns `None` when the body is not JSON or declares no error type.
pub fn decode_error<R: Read>(mut reader: R) -> Option<QueryError> {
    let envelope = {
        let mut de = serde_json::Deserializer::from_reader(&mut reader);
        EnvelopeSeed {
            data: PhantomData::<IgnoredAny>,
        }
        .deserialize(&mut de)
        .ok()
    };
    drain(&mut reader);

    let envelope = envelope?;
    if envelope.error_type.is_empty() {
        return None;
    }
    Some(QueryError::Api {
        status: envelope.status,
        error_type: ErrorType::from_wire(&envelope.error_type),
        message: envelope.error,
    })
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::domain::value_objects::MetricType;
    use std::io::Cursor;

    #[test]
    fn test_decode_vector() {
        let body = r#"{"status":"success","data":{"resultType":"vector","result":[{"metric":{"__name__":"up"},"value":[1700000000,"1"]}]}}"#;
        let (samples, stats) = decode_vector(body.as_bytes()).unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].name(), Some("up"));
        assert_eq!(samples[0].value, 1.0);
        assert_eq!(samples[0].timestamp, 1700000000.0);
        assert!(stats.is_none());
    }

    #[test]
    fn test_decode_error_envelope() {
        let body = r#"{"status":"error","errorType":"bad_data","error":"parse error"}"#;
        let err = decode_vector(body.as_bytes()).unwrap_err();
        assert_eq!(
            err,
            QueryError::Api {
                status: "error".to_string(),
                error_type: ErrorType::BadData,
                message: "parse error".to_string(),
            }
        );
        assert_eq!(err.error_type(), ErrorType::BadData);
    }

    #[test]
    fn test_error_envelope_data_is_skipped() {
        let body = r#"{"status":"error","errorType":"execution","error":"boom","data":{"resultType":"vector","result":"garbage"}}"#;
        let err = decode_vector(body.as_bytes()).unwrap_err();
        assert_eq!(err.error_type(), ErrorType::Execution);
        assert_eq!(err.to_string(), "execution: boom");
    }

    #[test]
    fn test_unknown_error_type() {
        let body = r#"{"status":"error","errorType":"wat","error":"x"}"#;
        assert_eq!(
            decode_vector(body.as_bytes()).unwrap_err().error_type(),
            ErrorType::Unknown
        );
    }

    #[test]
    fn test_unexpected_result_type() {
        let body = r#"{"status":"success","data":{"resultType":"scalar","result":[1700000000,"1"]}}"#;
        let err = decode_vector(body.as_bytes()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "bad_response: invalid result type, expected vector, got scalar"
        );
    }

    #[test]
    fn test_malformed_json() {
        let err = decode_vector(r#"{"status":"success","data":{"#.as_bytes()).unwrap_err();
        assert_eq!(err.error_type(), ErrorType::BadResponse);
        assert!(err.to_string().contains("JSON parse error"));
    }

    #[test]
    fn test_not_an_object() {
        let err = decode_vector("[1,2,3]".as_bytes()).unwrap_err();
        assert!(err.to_string().contains("JSON parse error"));
    }

    #[test]
    fn test_missing_status() {
        let err = decode_vector(r#"{"data":{}}"#.as_bytes()).unwrap_err();
        assert_eq!(err.to_string(), "bad_response: missing response status");
    }

    #[test]
    fn test_drains_body_on_early_failure() {
        let body = br#"{"status": 12, "data": {"resultType": "vector", "result": []}}"#;
        let mut cursor = Cursor::new(&body[..]);
        assert!(decode_vector(&mut cursor).is_err());
        assert_eq!(cursor.position() as usize, body.len());
    }

    #[test]
    fn test_drains_body_after_skipped_result() {
        let body = br#"{"status":"success","data":{"resultType":"string","result":[0,"x"]}}  "#;
        let mut cursor = Cursor::new(&body[..]);
        assert!(decode_vector(&mut cursor).is_err());
        assert_eq!(cursor.position() as usize, body.len());
    }

    #[test]
    fn test_invalid_sample_value() {
        let body = r#"{"status":"success","data":{"resultType":"vector","result":[{"metric":{},"value":[1,"abc"]}]}}"#;
        let err = decode_vector(body.as_bytes()).unwrap_err();
        assert_eq!(err.error_type(), ErrorType::BadResponse);
    }

    #[test]
    fn test_special_float_values() {
        let body = r#"{"status":"success","data":{"resultType":"vector","result":[
            {"metric":{"a":"1"},"value":[1,"+Inf"]},
            {"metric":{"a":"2"},"value":[1,"NaN"]}
        ]}}"#;
        let (samples, _) = decode_vector(body.as_bytes()).unwrap();
        assert!(samples[0].value.is_infinite());
        assert!(samples[1].value.is_nan());
    }

    #[test]
    fn test_decode_vector_with_stats() {
        let body = r#"{"status":"success","data":{"resultType":"vector","result":[],
            "stats":{"timings":{"evalTotalTime":0.5,"execTotalTime":0.75},"samples":{"totalQueryableSamples":12,"peakSamples":3}}}}"#;
        let (samples, stats) = decode_vector(body.as_bytes()).unwrap();
        assert!(samples.is_empty());
        let stats = stats.unwrap();
        assert_eq!(stats.timings.eval_total_time, 0.5);
        assert_eq!(stats.timings.exec_total_time, 0.75);
        assert_eq!(stats.samples.total_queryable_samples, 12);
        assert_eq!(stats.samples.peak_samples, 3);
    }

    #[test]
    fn test_result_before_result_type() {
        let body = r#"{"status":"success","data":{"result":[{"metric":{"job":"a"},"value":[5,"2.5"]}],"resultType":"vector"}}"#;
        let (samples, _) = decode_vector(body.as_bytes()).unwrap();
        assert_eq!(samples[0].value, 2.5);
        assert_eq!(samples[0].metric.get("job").map(String::as_str), Some("a"));
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let body = r#"{"status":"success","warnings":["w"],"data":{"resultType":"vector","result":[],"extra":{"a":[1,2]}}}"#;
        assert!(decode_vector(body.as_bytes()).is_ok());
    }

    #[test]
    fn test_decode_matrix() {
        let body = r#"{"status":"success","data":{"resultType":"matrix","result":[
            {"metric":{"__name__":"up","job":"a"},"values":[[1700000000,"1"],[1700000015,"0"]]}
        ]}}"#;
        let (series, _) = decode_matrix(body.as_bytes()).unwrap();
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].values.len(), 2);
        assert_eq!(
            series[0].values[1],
            SamplePair {
                timestamp: 1700000015.0,
                value: 0.0
            }
        );
    }

    #[test]
    fn test_decode_matrix_rejects_vector() {
        let body = r#"{"status":"success","data":{"resultType":"vector","result":[]}}"#;
        let err = decode_matrix(body.as_bytes()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "bad_response: invalid result type, expected matrix, got vector"
        );
    }

    #[test]
    fn test_decode_metadata() {
        let body = r#"{"status":"success","data":{
            "http_requests_total":[{"type":"counter","help":"Requests.","unit":""}],
            "mem":[{"type":"gauge","help":"Memory.","unit":"bytes"}]
        }}"#;
        let metadata = decode_metadata(body.as_bytes()).unwrap();
        assert_eq!(metadata.len(), 2);
        assert_eq!(
            metadata["http_requests_total"][0].metric_type,
            MetricType::Counter
        );
        assert_eq!(metadata["mem"][0].unit, "bytes");
    }

    #[test]
    fn test_decode_payload_metadata_picks_metric() {
        let body = r#"{"status":"success","data":{"foo":[{"type":"counter"}],"bar":[{"type":"gauge"}]}}"#;
        let (payload, stats) = decode_payload(&Query::metadata("foo"), body.as_bytes()).unwrap();
        assert!(stats.is_none());
        match payload {
            Payload::Metadata(m) => {
                assert_eq!(m.len(), 1);
                assert_eq!(m[0].metric_type, MetricType::Counter);
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_decode_payload_metadata_missing_metric() {
        let body = r#"{"status":"success","data":{}}"#;
        let (payload, _) = decode_payload(&Query::metadata("foo"), body.as_bytes()).unwrap();
        assert_eq!(payload, Payload::Metadata(vec![]));
    }

    #[test]
    fn test_decode_error_helper() {
        let err = decode_error(
            r#"{"status":"error","errorType":"server_error","error":"overloaded"}"#.as_bytes(),
        );
        assert_eq!(
            err,
            Some(QueryError::Api {
                status: "error".to_string(),
                error_type: ErrorType::Server,
                message: "overloaded".to_string(),
            })
        );
        assert_eq!(decode_error("<html>bad gateway</html>".as_bytes()), None);
        assert_eq!(decode_error(r#"{"status":"success","data":{}}"#.as_bytes()), None);
    }
}
