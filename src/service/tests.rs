//! End-to-end service tests over the wire surface.

use serde_json::{json, Value};

use super::*;

fn acquire_json(nodes: u64, cores_per_node: u64) -> Value {
    json!({
        "version": 1,
        "execution": {
            "R_lite": [{
                "rank": crate::idset::encode(0..nodes),
                "children": {"core": crate::idset::encode(0..cores_per_node)}
            }],
            "nodelist": [format!("node[0-{}]", nodes - 1)],
            "starttime": 0.0,
            "expiration": 1000.0
        }
    })
}

fn service(nodes: u64, cores_per_node: u64) -> ResourceService {
    let mut svc = ResourceService::new(Config::default()).unwrap();
    let update = AcquireUpdate {
        resources: Some(acquire_json(nodes, cores_per_node)),
        ..Default::default()
    };
    svc.apply_acquire(&update).unwrap();
    svc
}

fn slot_cores(nslots: u64, cores: u64, duration: u64) -> String {
    json!({
        "resources": [
            {"type": "slot", "count": nslots, "label": "task",
             "with": [{"type": "core", "count": cores}]}
        ],
        "attributes": {"system": {"duration": duration as f64}}
    })
    .to_string()
}

fn node_spec(count: u64, duration: u64) -> String {
    json!({
        "resources": [{"type": "node", "count": count}],
        "attributes": {"system": {"duration": duration as f64}}
    })
    .to_string()
}

fn r_lite(resp: &MatchResponse) -> Value {
    let r: Value = serde_json::from_str(&resp.r).unwrap();
    r["execution"]["R_lite"].clone()
}

#[test]
fn simple_allocate() {
    let mut svc = service(2, 2);
    let resp = svc
        .match_job("allocate", 1, &slot_cores(1, 2, 10), Some(0))
        .unwrap();
    assert_eq!(resp.status, "ALLOCATED");
    assert_eq!(resp.at, 0);
    assert!(resp.overhead >= 0.0);
    let lite = r_lite(&resp);
    assert_eq!(lite[0]["rank"], "0");
    assert_eq!(lite[0]["children"]["core"], "0-1");

    let info = svc.info(1).unwrap();
    assert_eq!(info.status, "ALLOCATED");
    assert_eq!(info.at, 0);
    assert!(svc.state().allocations().contains(&1));
}

#[test]
fn reserve_when_busy() {
    let mut svc = service(2, 2);
    svc.match_job("allocate", 1, &slot_cores(1, 4, 100), Some(0))
        .unwrap();
    let resp = svc
        .match_job("allocate_orelse_reserve", 2, &slot_cores(1, 2, 50), Some(0))
        .unwrap();
    assert_eq!(resp.status, "RESERVED");
    assert_eq!(resp.at, 100);
    assert!(svc.state().reservations().contains(&2));
    assert!(!svc.state().allocations().contains(&2));
}

#[test]
fn unsatisfiable_request() {
    let mut svc = service(2, 2);
    let err = svc
        .match_job("allocate_with_satisfiability", 1, &slot_cores(1, 5, 10), Some(0))
        .unwrap_err();
    assert_eq!(err.errno(), 19);
    assert!(!svc.state().is_existent(1));
}

#[test]
fn partial_cancel_then_rematch() {
    let mut svc = service(2, 2);
    svc.match_job("allocate", 1, &slot_cores(1, 2, 100), Some(0))
        .unwrap();
    let subset = json!({
        "version": 1,
        "execution": {
            "R_lite": [{"rank": "0", "children": {"core": "0"}}],
            "starttime": 0.0, "expiration": 100.0
        }
    })
    .to_string();
    let full = svc.partial_cancel(1, &subset).unwrap();
    assert!(!full);
    assert!(svc.state().is_existent(1));

    let resp = svc
        .match_job("allocate", 2, &slot_cores(1, 1, 10), Some(0))
        .unwrap();
    assert_eq!(resp.at, 0);
    let lite = r_lite(&resp);
    assert_eq!(lite[0]["rank"], "0");
    assert_eq!(lite[0]["children"]["core"], "0");
}

#[test]
fn down_node_hides_capacity() {
    let mut svc = service(2, 2);
    svc.set_status("/cluster0/node0", "down").unwrap();
    let err = svc
        .match_job("allocate", 1, &node_spec(2, 10), Some(0))
        .unwrap_err();
    assert_eq!(err.errno(), 16);
    let err = svc
        .match_job("satisfiability", 2, &node_spec(2, 10), Some(0))
        .unwrap_err();
    assert_eq!(err.errno(), 19);

    svc.set_status("/cluster0/node0", "up").unwrap();
    let resp = svc
        .match_job("allocate", 3, &node_spec(2, 10), Some(0))
        .unwrap();
    assert_eq!(resp.status, "ALLOCATED");
}

#[test]
fn update_is_idempotent_and_conflicts_on_mismatch() {
    let mut svc = service(2, 2);
    let resp = svc
        .match_job("allocate", 1, &slot_cores(1, 2, 10), Some(0))
        .unwrap();

    let again = svc.update_job(1, &resp.r).unwrap();
    assert_eq!(again.status, "ALLOCATED");
    assert!(again.overhead >= 0.0);
    assert_eq!(r_lite(&again), r_lite(&resp));

    // The idempotent update did not double-book: two more cores are free.
    let more = svc
        .match_job("allocate", 2, &slot_cores(1, 2, 10), Some(0))
        .unwrap();
    assert_eq!(r_lite(&more)[0]["rank"], "1");

    // A different R for the same jobid is a conflict.
    let other = json!({
        "version": 1,
        "execution": {
            "R_lite": [{"rank": "1", "children": {"core": "0"}}],
            "starttime": 0.0, "expiration": 10.0
        }
    })
    .to_string();
    let err = svc.update_job(1, &other).unwrap_err();
    assert_eq!(err.errno(), 22);
}

#[test]
fn update_rehydrates_unknown_job() {
    let mut svc = service(2, 2);
    let r = json!({
        "version": 1,
        "execution": {
            "R_lite": [{"rank": "0", "children": {"core": "0-1"}}],
            "starttime": 0.0, "expiration": 50.0
        }
    })
    .to_string();
    let resp = svc.update_job(9, &r).unwrap();
    assert_eq!(resp.status, "ALLOCATED");
    assert_eq!(resp.at, 0);
    // The replayed cores are now busy.
    let next = svc
        .match_job("allocate", 10, &slot_cores(1, 2, 10), Some(0))
        .unwrap();
    assert_eq!(r_lite(&next)[0]["rank"], "1");
}

#[test]
fn cancel_restores_capacity() {
    let mut svc = service(2, 2);
    svc.match_job("allocate", 1, &slot_cores(1, 4, 100), Some(0))
        .unwrap();
    svc.cancel(1).unwrap();
    assert!(!svc.state().is_existent(1));
    let resp = svc
        .match_job("allocate", 2, &slot_cores(1, 4, 100), Some(0))
        .unwrap();
    assert_eq!(resp.at, 0);

    assert_eq!(svc.cancel(99).unwrap_err().errno(), 2);
}

#[test]
fn match_multi_streams_responses() {
    let mut svc = service(2, 2);
    let jobs = vec![
        MatchMultiJob {
            jobid: 1,
            jobspec: serde_json::from_str(&slot_cores(1, 2, 10)).unwrap(),
            at: Some(0),
        },
        MatchMultiJob {
            jobid: 2,
            jobspec: serde_json::from_str(&slot_cores(1, 2, 10)).unwrap(),
            at: Some(0),
        },
        MatchMultiJob {
            jobid: 3,
            jobspec: serde_json::from_str(&slot_cores(1, 2, 10)).unwrap(),
            at: Some(0),
        },
    ];
    let responses = svc.match_multi("allocate", &jobs);
    assert_eq!(responses.len(), 3);
    assert!(responses[0].is_ok());
    assert!(responses[1].is_ok());
    // All four cores are gone by the third job.
    assert_eq!(responses[2].as_ref().unwrap_err().errno(), 16);
}

#[test]
fn status_reports_cached_r_sets() {
    let mut svc = service(2, 2);
    svc.match_job("allocate", 1, &slot_cores(1, 2, 100), Some(0))
        .unwrap();
    svc.set_status("/cluster0/node1", "down").unwrap();

    let status = svc.status_at(0).unwrap();
    let all: Value = serde_json::from_str(&status.all).unwrap();
    assert_eq!(all["execution"]["R_lite"][0]["rank"], "0-1");
    let down: Value = serde_json::from_str(&status.down).unwrap();
    assert_eq!(down["execution"]["R_lite"][0]["rank"], "1");
    let allocated: Value = serde_json::from_str(&status.allocated).unwrap();
    assert_eq!(allocated["execution"]["R_lite"][0]["rank"], "0");
    assert_eq!(allocated["execution"]["R_lite"][0]["children"]["core"], "0-1");
}

#[test]
fn find_with_explicit_format() {
    let mut svc = service(2, 2);
    let r = svc.find("status=up", Some("jgf")).unwrap();
    let doc: Value = serde_json::from_str(&r).unwrap();
    assert_eq!(doc["graph"]["nodes"].as_array().unwrap().len(), 7);
    assert!(svc.find("color=red", None).is_err());
}

#[test]
fn property_round_trip() {
    let mut svc = service(1, 1);
    svc.set_property("/cluster0/node0", "badram=1").unwrap();
    assert_eq!(
        svc.get_property("/cluster0/node0", "badram").unwrap(),
        vec!["1"]
    );
    // Properties are visible to find.
    let r = svc.find("property=badram", Some("rv1_nosched")).unwrap();
    assert!(r.contains("R_lite"));
    svc.remove_property("/cluster0/node0", "badram").unwrap();
    assert_eq!(
        svc.get_property("/cluster0/node0", "badram").unwrap_err().errno(),
        2
    );
    assert_eq!(
        svc.set_property("/cluster0/node9", "x=1").unwrap_err().errno(),
        2
    );
}

#[test]
fn stats_track_matches() {
    let mut svc = service(2, 2);
    svc.match_job("allocate", 1, &slot_cores(1, 2, 10), Some(0))
        .unwrap();
    svc.match_job("allocate", 2, &slot_cores(1, 2, 10), Some(0))
        .unwrap();
    let _ = svc.match_job("allocate", 3, &slot_cores(1, 2, 10), Some(0));

    let stats = svc.stats_get();
    assert_eq!(stats["V"], 7);
    assert_eq!(stats["match"]["succeeded"]["njobs"], 2);
    assert_eq!(stats["match"]["failed"]["njobs"], 1);
    assert!(stats["match"]["succeeded"]["stats"]["avg"].as_f64().unwrap() >= 0.0);
    // Two nodes, each with three vertices (node + two cores).
    assert_eq!(stats["by_rank"]["0-1"], 3);

    svc.stats_clear();
    let stats = svc.stats_get();
    assert_eq!(stats["match"]["succeeded"]["njobs-reset"], 0);
    assert_eq!(stats["match"]["succeeded"]["njobs"], 2);
}

#[test]
fn feasibility_check_probes_without_state() {
    let mut svc = service(2, 2);
    svc.feasibility_check(&slot_cores(1, 4, 10)).unwrap();
    let err = svc.feasibility_check(&slot_cores(1, 5, 10)).unwrap_err();
    assert_eq!(err.errno(), 19);
    assert!(svc.state().is_empty());
}

#[test]
fn notify_subscription_lifecycle() {
    let mut svc = service(2, 2);
    let (route, initial) = svc.notify_subscribe().unwrap();
    assert!(initial["resources"]["execution"]["R_lite"].is_array());

    svc.set_status("/cluster0/node0", "down").unwrap();
    let updates = svc.poll_notifications();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].0, route);
    assert_eq!(updates[0].1.down, "0");
    assert_eq!(updates[0].1.up, "");

    svc.notify_disconnect(route);
    svc.set_status("/cluster0/node0", "up").unwrap();
    assert!(svc.poll_notifications().is_empty());
}

#[test]
fn acquire_up_down_and_shrink() {
    let mut svc = service(3, 2);
    // Rank 2 shrinks away while also named down: shrink wins.
    let update = AcquireUpdate {
        down: Some("1-2".to_owned()),
        shrink: Some("2".to_owned()),
        ..Default::default()
    };
    svc.apply_acquire(&update).unwrap();
    assert_eq!(svc.graph().by_rank(2).len(), 0);
    assert_eq!(svc.graph().metadata.nodes_up, 1);
    // node1 is down, not removed.
    assert_eq!(svc.graph().by_rank(1).len(), 3);

    let update = AcquireUpdate {
        up: Some("1".to_owned()),
        ..Default::default()
    };
    svc.apply_acquire(&update).unwrap();
    assert_eq!(svc.graph().metadata.nodes_up, 2);
}

#[test]
fn acquire_expiration_zero_means_forever() {
    let mut svc = service(1, 1);
    let update = AcquireUpdate {
        expiration: Some(0.0),
        ..Default::default()
    };
    svc.apply_acquire(&update).unwrap();
    assert_eq!(svc.graph().graph_duration.end, crate::graph::NO_EXPIRATION);
}

#[test]
fn dispatch_round_trip() {
    let mut svc = service(2, 2);
    let resp = svc
        .dispatch(
            "resource.match",
            json!({
                "cmd": "allocate",
                "jobid": 1,
                "jobspec": slot_cores(1, 2, 10),
                "at": 0
            }),
        )
        .unwrap();
    assert_eq!(resp["status"], "ALLOCATED");
    assert_eq!(resp["jobid"], 1);

    let info = svc.dispatch("resource.info", json!({"jobid": 1})).unwrap();
    assert_eq!(info["status"], "ALLOCATED");

    let cancel = svc.dispatch("resource.cancel", json!({"jobid": 1})).unwrap();
    assert_eq!(cancel, json!({}));

    let err = svc
        .dispatch("resource.info", json!({"jobid": 1}))
        .unwrap_err();
    assert_eq!(err.errno(), 2);

    let err = svc.dispatch("resource.nope", json!({})).unwrap_err();
    assert_eq!(err.errno(), 22);

    // Malformed payloads are protocol errors.
    let err = svc
        .dispatch("resource.match", json!({"cmd": "allocate"}))
        .unwrap_err();
    assert_eq!(err.errno(), 71);
}

#[test]
fn duplicate_jobid_rejected() {
    let mut svc = service(2, 2);
    svc.match_job("allocate", 1, &slot_cores(1, 1, 10), Some(0))
        .unwrap();
    let err = svc
        .match_job("allocate", 1, &slot_cores(1, 1, 10), Some(0))
        .unwrap_err();
    assert_eq!(err.errno(), 22);
    assert_eq!(svc.reserve_jobid().unwrap(), 2);
}

#[test]
fn unknown_cmd_and_bad_jobspec() {
    let mut svc = service(1, 1);
    assert_eq!(
        svc.match_job("allocate_maybe", 1, &slot_cores(1, 1, 10), Some(0))
            .unwrap_err()
            .errno(),
        22
    );
    assert_eq!(
        svc.match_job("allocate", 1, "not json", Some(0))
            .unwrap_err()
            .errno(),
        22
    );
}
