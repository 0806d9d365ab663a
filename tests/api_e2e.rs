//! Request/response surface and worker runtime, end to end.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use contactlink::api::{clear_contacts, identify, list_contacts};
use contactlink::{
    ContactId, IdentityResolver, InMemoryContactStore, ResolverConfig, ResolverRequest,
    ResolverResponse, ResolverRuntime, ResolverRuntimeConfig,
};

fn resolver() -> IdentityResolver {
    IdentityResolver::new(Arc::new(InMemoryContactStore::new()))
}

#[test]
fn test_identify_flow_over_json() {
    let resolver = resolver();

    let first = identify(&resolver, br#"{"email":"lorraine@hillvalley.edu","phoneNumber":"123456"}"#);
    assert_eq!(first.status, 201);

    let second = identify(&resolver, br#"{"email":"mcfly@hillvalley.edu","phoneNumber":123456}"#);
    assert_eq!(second.status, 201);
    assert_eq!(
        second.body,
        json!({
            "contact": {
                "primaryContactId": 1,
                "emails": ["lorraine@hillvalley.edu", "mcfly@hillvalley.edu"],
                "phoneNumbers": ["123456"],
                "secondaryContactIds": [2]
            }
        })
    );

    // Either identifier alone resolves to the same cluster.
    let by_phone = identify(&resolver, br#"{"email":null,"phoneNumber":"123456"}"#);
    assert_eq!(by_phone.body, second.body);
    let by_email = identify(&resolver, br#"{"email":"mcfly@hillvalley.edu"}"#);
    assert_eq!(by_email.body, second.body);
}

#[test]
fn test_list_exposes_record_shape() {
    let resolver = resolver();
    identify(&resolver, br#"{"email":"a@x","phoneNumber":"1"}"#);
    identify(&resolver, br#"{"email":"b@x","phoneNumber":"1"}"#);

    let list = list_contacts(&resolver);
    assert_eq!(list.status, 200);
    let records = list.body.as_array().unwrap();
    assert_eq!(records.len(), 2);

    let secondary = &records[1];
    assert_eq!(secondary["id"], 2);
    assert_eq!(secondary["email"], "b@x");
    assert_eq!(secondary["phoneNumber"], "1");
    assert_eq!(secondary["linkedId"], 1);
    assert_eq!(secondary["linkPrecedence"], "secondary");
    assert!(secondary["createdAt"].is_string());
    assert!(secondary["updatedAt"].is_string());
    assert_eq!(records[0]["linkedId"], Value::Null);
}

#[test]
fn test_error_bodies() {
    let resolver = resolver();

    let empty = identify(&resolver, br#"{}"#);
    assert_eq!(empty.status, 400);
    assert_eq!(empty.body["error"], "Error identifying contact");
    assert!(empty.body["details"].is_string());

    let wrong_type = identify(&resolver, br#"{"email": 42}"#);
    assert_eq!(wrong_type.status, 400);

    let too_long = format!(r#"{{"phoneNumber":"{}"}}"#, "9".repeat(65));
    assert_eq!(identify(&resolver, too_long.as_bytes()).status, 400);

    assert!(list_contacts(&resolver).body.as_array().unwrap().is_empty());
}

#[test]
fn test_clear_reports_count() {
    let resolver = resolver();
    identify(&resolver, br#"{"email":"a@x"}"#);
    identify(&resolver, br#"{"email":"b@x"}"#);
    identify(&resolver, br#"{"email":"a@x","phoneNumber":"7"}"#);

    let cleared = clear_contacts(&resolver);
    assert_eq!(cleared.status, 200);
    assert_eq!(cleared.body, json!({ "count": 3 }));
    assert_eq!(clear_contacts(&resolver).body, json!({ "count": 0 }));
}

#[test]
fn test_runtime_serves_concurrent_clients() {
    let resolver = IdentityResolver::with_config(
        Arc::new(InMemoryContactStore::new()),
        ResolverConfig {
            commit_attempts: 32,
            ..ResolverConfig::default()
        },
    )
    .unwrap();
    let runtime = ResolverRuntime::new(resolver, ResolverRuntimeConfig::default()).unwrap();

    let handles: Vec<_> = (0..32)
        .map(|i| {
            runtime
                .submit(ResolverRequest::Identify {
                    email: Some(format!("user{}@x", i % 4)),
                    phone_number: Some(format!("{}", i % 3)),
                })
                .unwrap()
        })
        .collect();
    for handle in handles {
        let response = handle.join_timeout(Duration::from_secs(10)).unwrap();
        assert!(matches!(response, ResolverResponse::Identity(_)));
    }

    // Every user shares a phone number with another, so one cluster remains.
    let ResolverResponse::Contacts(all) = runtime.execute(ResolverRequest::ListAll).unwrap() else {
        panic!("expected contacts");
    };
    let primaries: Vec<_> = all.iter().filter(|c| c.is_primary()).collect();
    assert_eq!(primaries.len(), 1);
    assert_eq!(primaries[0].id, ContactId::new(1));

    let api_view = list_contacts(runtime.resolver());
    assert_eq!(api_view.body.as_array().unwrap().len(), all.len());
}
