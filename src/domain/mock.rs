//! Deterministic sample records served when no CRM API key is configured.

use serde_json::{json, Value};

pub const MOCK_NOTICE: &str = "mock data: no CRM API key configured";

pub fn leads() -> Vec<Value> {
    vec![
        json!({
            "id": "mock-lead-1",
            "name": "Ada Lovelace",
            "title": "VP Engineering",
            "seniority": "vp",
            "email": "ada@analytical.example",
            "organization": "Analytical Engines",
            "organization_domain": "analytical.example",
            "city": "London",
            "country": "United Kingdom",
        }),
        json!({
            "id": "mock-lead-2",
            "name": "Grace Hopper",
            "title": "Director of Platform",
            "seniority": "director",
            "email": "grace@compilers.example",
            "organization": "Compilers Inc",
            "organization_domain": "compilers.example",
            "city": "Arlington",
            "country": "United States",
        }),
        json!({
            "id": "mock-lead-3",
            "name": "Alan Turing",
            "title": "Head of Research",
            "seniority": "head",
            "email": "alan@bletchley.example",
            "organization": "Bletchley Labs",
            "organization_domain": "bletchley.example",
            "city": "Manchester",
            "country": "United Kingdom",
        }),
    ]
}

pub fn person(email: &str) -> Value {
    leads()
        .into_iter()
        .find(|lead| lead["email"] == email)
        .unwrap_or_else(|| {
            json!({
                "id": "mock-person",
                "name": "Sample Person",
                "title": "Account Executive",
                "email": email,
                "organization": "Example Corp",
            })
        })
}

pub fn contacts() -> Vec<Value> {
    vec![
        json!({
            "id": "mock-contact-1",
            "name": "Katherine Johnson",
            "title": "Chief Analyst",
            "email": "katherine@orbits.example",
            "organization": "Orbit Analytics",
            "stage": "Engaged",
        }),
        json!({
            "id": "mock-contact-2",
            "name": "Margaret Hamilton",
            "title": "Software Lead",
            "email": "margaret@apollo-guidance.example",
            "organization": "Guidance Systems",
            "stage": "Cold",
        }),
    ]
}

pub fn contact(contact_id: &str) -> Value {
    contacts()
        .into_iter()
        .find(|contact| contact["id"] == contact_id)
        .unwrap_or_else(|| {
            json!({
                "id": contact_id,
                "name": "Sample Contact",
                "title": "Buyer",
                "email": "buyer@example.com",
                "organization": "Example Corp",
                "stage": "New",
            })
        })
}

pub fn deals() -> Vec<Value> {
    vec![
        json!({
            "id": "mock-deal-1",
            "name": "Orbit Analytics expansion",
            "amount": 48000,
            "stage": "Negotiation",
            "closed_date": null,
        }),
        json!({
            "id": "mock-deal-2",
            "name": "Guidance Systems pilot",
            "amount": 12000,
            "stage": "Discovery",
            "closed_date": null,
        }),
    ]
}

pub fn deal(deal_id: &str) -> Value {
    deals()
        .into_iter()
        .find(|deal| deal["id"] == deal_id)
        .unwrap_or_else(|| {
            json!({
                "id": deal_id,
                "name": "Sample deal",
                "amount": 10000,
                "stage": "Qualification",
                "closed_date": null,
            })
        })
}

pub fn sequences() -> Vec<Value> {
    vec![
        json!({
            "id": "mock-sequence-1",
            "name": "Outbound - VP Engineering",
            "active": true,
            "num_steps": 4,
        }),
        json!({
            "id": "mock-sequence-2",
            "name": "Webinar follow-up",
            "active": false,
            "num_steps": 2,
        }),
    ]
}

/// Keeps records whose `name` contains `needle`, case-insensitively.
pub fn filter_by_name(records: Vec<Value>, needle: Option<&str>) -> Vec<Value> {
    let Some(needle) = needle.map(str::to_ascii_lowercase) else {
        return records;
    };

    records
        .into_iter()
        .filter(|record| {
            record["name"]
                .as_str()
                .map(|name| name.to_ascii_lowercase().contains(&needle))
                .unwrap_or(false)
        })
        .collect()
}
