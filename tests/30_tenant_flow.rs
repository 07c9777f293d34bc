//! End-to-end tenant flow against a live database: company registration,
//! invite-based driver onboarding, refresh rotation with reuse detection,
//! the balance gate, and cross-tenant isolation.

mod common;

use anyhow::{Context, Result};
use common::Harness;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};

struct Tenant {
    access_token: String,
}

async fn register_tenant(client: &Client, server: &Harness, label: &str) -> Result<Tenant> {
    let suffix = common::tag(label);
    let res = client
        .post(server.url("/auth/register-company"))
        .json(&json!({
            "companyName": format!("Acme {}", suffix),
            "username": format!("admin-{}", suffix),
            "password": "correct-horse-battery",
        }))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::CREATED, "company registration failed");

    let body = res.json::<Value>().await?;
    let access_token = body["data"]["accessToken"]
        .as_str()
        .context("missing access token")?
        .to_string();
    Ok(Tenant { access_token })
}

async fn post_json(
    client: &Client,
    url: String,
    token: &str,
    body: Value,
) -> Result<(StatusCode, Value)> {
    let res = client
        .post(url)
        .bearer_auth(token)
        .json(&body)
        .send()
        .await?;
    let status = res.status();
    let body = res.json::<Value>().await.unwrap_or_default();
    Ok((status, body))
}

#[tokio::test]
async fn invite_registration_and_session_lifecycle() -> Result<()> {
    let server = common::server().await?;
    let client = Client::new();

    let tenant = register_tenant(&client, server, "onboard").await?;

    // Admin provisions a driver and a single-use invite.
    let (status, driver) = post_json(
        &client,
        server.url("/api/drivers"),
        &tenant.access_token,
        json!({ "name": "Pat Driver" }),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);
    let driver_id = driver["data"]["id"].as_str().context("driver id")?.to_string();

    let (status, invite) = post_json(
        &client,
        server.url("/api/invites"),
        &tenant.access_token,
        json!({ "driverId": driver_id }),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);
    let code = invite["data"]["code"].as_str().context("invite code")?.to_string();

    // A second active invite for the same driver is refused.
    let (status, _) = post_json(
        &client,
        server.url("/api/invites"),
        &tenant.access_token,
        json!({ "driverId": driver_id }),
    )
    .await?;
    assert_eq!(status, StatusCode::CONFLICT);

    // Driver self-registers through the invite.
    let driver_username = common::tag("driver");
    let res = client
        .post(server.url("/auth/mobile/register"))
        .json(&json!({
            "username": driver_username,
            "password": "hunter22-long",
            "inviteCode": code,
        }))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::CREATED);
    let session = res.json::<Value>().await?;
    let mobile_access = session["data"]["accessToken"].as_str().context("token")?.to_string();
    let refresh0 = session["data"]["refreshToken"]
        .as_str()
        .context("mobile refresh token in body")?
        .to_string();

    // Reusing the original code must fail as invalid-or-used.
    let res = client
        .post(server.url("/auth/mobile/register"))
        .json(&json!({
            "username": common::tag("driver"),
            "password": "hunter22-long",
            "inviteCode": invite["data"]["code"],
        }))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    // The new mobile user can read itself without any granted permission.
    let res = client
        .get(server.url("/api/mobile/me"))
        .bearer_auth(&mobile_access)
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);
    let me = res.json::<Value>().await?;
    assert_eq!(me["data"]["username"], driver_username.as_str());

    // Rotation: refresh0 -> refresh1, then replaying refresh0 kills the family.
    let res = client
        .post(server.url("/auth/refresh"))
        .json(&json!({ "refreshToken": refresh0 }))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);
    let rotated = res.json::<Value>().await?;
    let refresh1 = rotated["data"]["refreshToken"].as_str().context("token")?.to_string();

    let res = client
        .post(server.url("/auth/refresh"))
        .json(&json!({ "refreshToken": refresh0 }))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED, "replay must be rejected");

    let res = client
        .post(server.url("/auth/refresh"))
        .json(&json!({ "refreshToken": refresh1 }))
        .send()
        .await?;
    assert_eq!(
        res.status(),
        StatusCode::UNAUTHORIZED,
        "descendants must die with the family"
    );

    Ok(())
}

#[tokio::test]
async fn balance_gate_limits_mission_creation() -> Result<()> {
    let server = common::server().await?;
    let client = Client::new();

    let tenant = register_tenant(&client, server, "balance").await?;

    let (status, _) = post_json(
        &client,
        server.url("/api/balance/purchase"),
        &tenant.access_token,
        json!({ "type": "per_missions", "quantity": 2 }),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);

    let mission = |i: u32| {
        json!({
            "address": format!("{} Main St", i),
            "scheduledDate": "2025-01-31",
        })
    };

    for i in 0..2 {
        let (status, _) = post_json(
            &client,
            server.url("/api/missions"),
            &tenant.access_token,
            mission(i),
        )
        .await?;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (status, body) = post_json(
        &client,
        server.url("/api/missions"),
        &tenant.access_token,
        mission(3),
    )
    .await?;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["errorCode"], "BALANCE_EXCEEDED");
    assert_eq!(body["balanceType"], "per_missions");

    // The counter bottomed out at zero.
    let res = client
        .get(server.url("/api/balance"))
        .bearer_auth(&tenant.access_token)
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);
    let balance = res.json::<Value>().await?;
    assert_eq!(balance["data"]["remaining"], 0);

    Ok(())
}

#[tokio::test]
async fn tenants_never_see_each_other() -> Result<()> {
    let server = common::server().await?;
    let client = Client::new();

    let tenant_a = register_tenant(&client, server, "iso-a").await?;
    let tenant_b = register_tenant(&client, server, "iso-b").await?;

    let (status, created) = post_json(
        &client,
        server.url("/api/missions"),
        &tenant_a.access_token,
        json!({ "address": "1 Isolation Way", "scheduledDate": "2025-02-01" }),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);
    let mission_id = created["data"]["id"].as_str().context("mission id")?;

    // Tenant B lists the same date and must not see A's mission.
    let res = client
        .get(server.url("/api/missions?date=2025-02-01"))
        .bearer_auth(&tenant_b.access_token)
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);
    let listing = res.json::<Value>().await?;
    let rows = listing["data"].as_array().context("rows")?;
    assert!(
        rows.iter().all(|m| m["id"] != mission_id),
        "tenant B can see tenant A's mission"
    );

    Ok(())
}
