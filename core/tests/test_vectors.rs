//! Verify `build_*` methods against JSON request vectors in `test-vectors/`.
//!
//! Each case names an operation, its input and the request it must produce.
//! Bodies are compared as parsed JSON so field order does not matter.

use serde_json::Value;
use vinca_core::{
    Card, Credential, Criteria, Filters, Grade, HttpMethod, HttpRequest, Metadata, RecordId, Session, Sort,
    UnixDay, VincaClient,
};

fn parse_method(s: &str) -> HttpMethod {
    match s {
        "GET" => HttpMethod::Get,
        "POST" => HttpMethod::Post,
        other => panic!("unknown method: {other}"),
    }
}

fn build(client: &VincaClient, session: &Session, operation: &str, input: &Value) -> HttpRequest {
    let str_field = |key: &str| input[key].as_str().unwrap();
    let filters = || Filters(input["filters"].clone());
    let result = match operation {
        "login" => client.build_login(str_field("username"), str_field("password")),
        "register" => client.build_register(str_field("username"), str_field("password")),
        "commit_card" => {
            let card: Card = serde_json::from_value(input["card"].clone()).unwrap();
            let metadata: Metadata = serde_json::from_value(input["metadata"].clone()).unwrap();
            client.build_commit_card(session, &card, metadata)
        }
        "commit_grade" => {
            let card_id: RecordId = serde_json::from_value(input["card_id"].clone()).unwrap();
            let metadata: Metadata = serde_json::from_value(input["metadata"].clone()).unwrap();
            client.build_commit_grade(session, &card_id, &Grade::from(str_field("grade")), metadata)
        }
        "due_count" => client.build_due_count(session, &filters()),
        "next_two_due" => {
            let criteria = Criteria {
                sort: Sort(input["sort"].clone()),
                filters: filters(),
            };
            client.build_next_two_due(session, &criteria)
        }
        "purge" => client.build_purge(session, &filters()),
        "hypothetical_due_dates" => client.build_hypothetical_due_dates(
            session,
            &RecordId::from(str_field("card_id")),
            UnixDay(input["date"].as_i64().unwrap()),
        ),
        "protected_media" => {
            client.build_protected_media(session, &RecordId::from(input["media_id"].as_i64().unwrap()))
        }
        other => panic!("unknown operation: {other}"),
    };
    result.unwrap()
}

#[test]
fn request_vectors() {
    let raw = include_str!("../../test-vectors/requests.json");
    let vectors: Value = serde_json::from_str(raw).unwrap();
    let base_url = vectors["base_url"].as_str().unwrap();
    let client = VincaClient::new(base_url).unwrap();
    let session = Session::new(Credential {
        access_token: vectors["token"].as_str().unwrap().to_string(),
        username: "alice".to_string(),
    });

    for case in vectors["cases"].as_array().unwrap() {
        let name = case["name"].as_str().unwrap();
        let expected = &case["expected_request"];
        let req = build(&client, &session, case["operation"].as_str().unwrap(), &case["input"]);

        assert_eq!(req.method, parse_method(expected["method"].as_str().unwrap()), "{name}: method");
        assert_eq!(req.url, format!("{base_url}{}", expected["path"].as_str().unwrap()), "{name}: url");

        let expected_headers: Vec<(String, String)> = expected["headers"]
            .as_array()
            .unwrap()
            .iter()
            .map(|h| {
                let pair = h.as_array().unwrap();
                (pair[0].as_str().unwrap().to_string(), pair[1].as_str().unwrap().to_string())
            })
            .collect();
        assert_eq!(req.headers, expected_headers, "{name}: headers");

        if let Some(form) = expected.get("form") {
            assert_eq!(req.body.as_deref(), form.as_str(), "{name}: form body");
        } else if let Some(body) = expected.get("body") {
            let actual: Value = serde_json::from_str(req.body.as_deref().unwrap()).unwrap();
            assert_eq!(&actual, body, "{name}: body");
        } else {
            assert!(req.body.is_none(), "{name}: unexpected body");
        }
    }
}
