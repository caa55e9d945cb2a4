mod common;

use crate::common::{post_file, start_server, url};
use anyhow::Result;
use serde_json::{json, Value};

const MOVIES_CSV: &[u8] = b"title,rank\nHeat,3\nAlien,1\nRonin,4\nDune,2\n";

fn rank_of(item: &Value) -> u32 {
    item["rank"].as_str().unwrap().parse().unwrap()
}

/// Drive a session to completion, always preferring the smaller `rank`
/// value, and return the final payload.
async fn drive_to_completion(
    client: &reqwest::Client,
    session_id: &str,
    mut payload: Value,
) -> Result<Value> {
    while payload["status"] == "ranking" {
        let preferred = rank_of(&payload["left_item"]) < rank_of(&payload["right_item"]);
        payload = client
            .post(url("/api/compare"))
            .json(&json!({"session_id": session_id, "candidate_preferred": preferred}))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
    }
    Ok(payload)
}

#[tokio::test]
async fn test_upload_rank_and_download_results() -> Result<()> {
    start_server().await?;
    let client = reqwest::Client::new();

    let upload: Value = post_file(&client, "/api/upload-csv", MOVIES_CSV.to_vec())
        .await?
        .error_for_status()?
        .json()
        .await?;
    assert_eq!(upload["item_count"], 4);
    assert_eq!(upload["fieldnames"], json!(["title", "rank"]));
    let session_id = upload["session_id"].as_str().unwrap().to_owned();

    let first: Value = client
        .post(url("/api/start-ranking"))
        .json(&json!({"session_id": session_id, "randomize": false}))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    assert_eq!(first["status"], "ranking");
    assert_eq!(first["total_items"], 4);
    // No shuffle: the first comparison is the second row against the first.
    assert_eq!(first["left_item"]["title"], "Alien");
    assert_eq!(first["right_item"]["title"], "Heat");

    let done = drive_to_completion(&client, &session_id, first).await?;
    let titles: Vec<&str> = done["sorted_items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|item| item["title"].as_str().unwrap())
        .collect();
    assert_eq!(titles, vec!["Alien", "Dune", "Heat", "Ronin"]);

    let results = client
        .post(url("/api/save-results"))
        .json(&json!({"session_id": session_id}))
        .send()
        .await?
        .error_for_status()?;
    assert_eq!(results.headers()["content-type"], "text/csv");
    assert_eq!(
        results.text().await?,
        "title,rank\nAlien,1\nDune,2\nHeat,3\nRonin,4\n"
    );

    // Cleanup is idempotent; afterwards the session is gone.
    for _ in 0..2 {
        let cleaned: Value = client
            .post(url("/api/cleanup"))
            .json(&json!({"session_id": session_id}))
            .send()
            .await?
            .json()
            .await?;
        assert_eq!(cleaned["success"], true);
    }
    let status = client
        .post(url("/api/start-ranking"))
        .json(&json!({"session_id": session_id, "randomize": false}))
        .send()
        .await?
        .status();
    assert_eq!(status, 404);

    Ok(())
}

#[tokio::test]
async fn test_save_and_load_progress_resumes_exactly() -> Result<()> {
    start_server().await?;
    let client = reqwest::Client::new();

    let upload: Value = post_file(&client, "/api/upload-csv", MOVIES_CSV.to_vec())
        .await?
        .json()
        .await?;
    let session_id = upload["session_id"].as_str().unwrap().to_owned();

    client
        .post(url("/api/start-ranking"))
        .json(&json!({"session_id": session_id, "randomize": false}))
        .send()
        .await?
        .error_for_status()?;

    // Answer one comparison, remember what came next.
    let after_answer: Value = client
        .post(url("/api/compare"))
        .json(&json!({"session_id": session_id, "candidate_preferred": true}))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(after_answer["status"], "ranking");

    let snapshot = client
        .post(url("/api/save-progress"))
        .json(&json!({"session_id": session_id}))
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?;
    let header: Vec<&str> = snapshot.lines().next().unwrap().split(',').collect();
    assert_eq!(header.len(), 3);
    header.iter().for_each(|v| {
        v.parse::<usize>().unwrap();
    });

    // A resumed session poses exactly the comparison that was pending.
    let resumed: Value = post_file(&client, "/api/load-progress", snapshot.into_bytes())
        .await?
        .error_for_status()?
        .json()
        .await?;
    assert_eq!(resumed["status"], "ranking");
    assert_eq!(resumed["left_item"], after_answer["left_item"]);
    assert_eq!(resumed["right_item"], after_answer["right_item"]);
    assert_eq!(resumed["items_done"], after_answer["items_done"]);

    // The resumed session ranks to the same final order.
    let resumed_id = resumed["session_id"].as_str().unwrap().to_owned();
    let done = drive_to_completion(&client, &resumed_id, resumed).await?;
    let titles: Vec<&str> = done["sorted_items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|item| item["title"].as_str().unwrap())
        .collect();
    assert_eq!(titles, vec!["Alien", "Dune", "Heat", "Ronin"]);

    Ok(())
}

#[tokio::test]
async fn test_empty_csv_completes_immediately() -> Result<()> {
    start_server().await?;
    let client = reqwest::Client::new();

    let upload: Value = post_file(&client, "/api/upload-csv", b"title,rank\n".to_vec())
        .await?
        .json()
        .await?;
    assert_eq!(upload["item_count"], 0);
    let session_id = upload["session_id"].as_str().unwrap();

    let payload: Value = client
        .post(url("/api/start-ranking"))
        .json(&json!({"session_id": session_id, "randomize": false}))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(payload["status"], "complete");
    assert_eq!(payload["sorted_items"], json!([]));

    Ok(())
}

#[tokio::test]
async fn test_error_responses() -> Result<()> {
    start_server().await?;
    let client = reqwest::Client::new();

    // Unknown session
    let response = client
        .post(url("/api/start-ranking"))
        .json(&json!({"session_id": "unknown", "randomize": false}))
        .send()
        .await?;
    assert_eq!(response.status(), 404);
    let body: Value = response.json().await?;
    assert_eq!(body["error_type"], "not_found");

    // Answer with no pending comparison
    let upload: Value = post_file(&client, "/api/upload-csv", MOVIES_CSV.to_vec())
        .await?
        .json()
        .await?;
    let session_id = upload["session_id"].as_str().unwrap();
    let response = client
        .post(url("/api/compare"))
        .json(&json!({"session_id": session_id, "candidate_preferred": true}))
        .send()
        .await?;
    assert_eq!(response.status(), 409);
    let body: Value = response.json().await?;
    assert_eq!(body["error_type"], "invalid_state");

    // Results before completion
    client
        .post(url("/api/start-ranking"))
        .json(&json!({"session_id": session_id, "randomize": false}))
        .send()
        .await?;
    let response = client
        .post(url("/api/save-results"))
        .json(&json!({"session_id": session_id}))
        .send()
        .await?;
    assert_eq!(response.status(), 409);

    // Malformed progress snapshot
    let response = post_file(&client, "/api/load-progress", b"not a snapshot".to_vec()).await?;
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await?;
    assert_eq!(body["error_type"], "format");

    // Multipart without a `file` field
    let form = reqwest::multipart::Form::new().text("other", "x");
    let response = client
        .post(url("/api/upload-csv"))
        .multipart(form)
        .send()
        .await?;
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await?;
    assert_eq!(body["error_type"], "validation");

    Ok(())
}
