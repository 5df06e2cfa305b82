use std::collections::{HashMap, HashSet};

use itertools::Itertools;
use rust_decimal::Decimal;

use super::contracts::{MatchRecord, ResultPayloadV1, RunKpis, RunSeries, StagedCrm, StagedMail, TopCity, TopZip, YoyOverlay};
use super::normalize::zip5;

/// # NDOC
/// component: `subsystems::mail_trace::aggregator`
/// purpose: Deduped KPI and monthly-series computation over staging and
///   matches for a run (C7). Reads only; groups matches by `job_index`
///   defensively (takes the max per field) rather than assuming the match
///   store is already perfectly one-row-per-job.

fn dedupe_matches_by_job_index(matches: &[MatchRecord]) -> Vec<MatchRecord> {
    matches
        .iter()
        .into_group_map_by(|m| m.job_index.clone())
        .into_values()
        .map(|group| {
            group
                .into_iter()
                .max_by_key(|m| m.matched_mail_dates.iter().max().cloned())
                .cloned()
                .expect("group_map never yields an empty group")
        })
        .collect()
}

fn ym(year: i32, month: u32) -> String {
    format!("{:04}-{:02}", year, month)
}

fn months_series(months: &[String], counts: &HashMap<String, u64>) -> Vec<u64> {
    months.iter().map(|m| *counts.get(m).unwrap_or(&0)).collect()
}

fn yoy_overlay(counts: &HashMap<String, u64>) -> Option<YoyOverlay> {
    let latest_year = counts
        .keys()
        .filter_map(|k| k.split('-').next().and_then(|y| y.parse::<i32>().ok()))
        .max()?;
    let prev_year = latest_year - 1;

    let months: Vec<String> = (1..=12).map(|m| format!("{:02}", m)).collect();
    let latest: Vec<u64> = months.iter().map(|m| *counts.get(&format!("{latest_year}-{m}")).unwrap_or(&0)).collect();
    let previous: Vec<u64> = months.iter().map(|m| *counts.get(&format!("{prev_year}-{m}")).unwrap_or(&0)).collect();

    Some(YoyOverlay {
        months: months.iter().map(|m| format!("{latest_year}-{m}")).collect(),
        latest_year: latest,
        previous_year: previous,
    })
}

/// Computes the full §4.7 result payload from staging + matches. Pure
/// function over its inputs; callers fetch the rows for `run_id` first.
pub fn aggregate(run_id: &str, mail: &[StagedMail], crm: &[StagedCrm], matches_raw: &[MatchRecord]) -> ResultPayloadV1 {
    let matches = dedupe_matches_by_job_index(matches_raw);

    let total_mail = mail
        .iter()
        .map(|m| (m.full_address.clone(), m.sent_date))
        .collect::<HashSet<_>>()
        .len() as u64;
    let unique_mail_addresses = mail.iter().map(|m| m.full_address.clone()).collect::<HashSet<_>>().len() as u64;
    let total_jobs = crm.iter().map(|c| c.job_index.clone()).collect::<HashSet<_>>().len() as u64;
    let match_count = matches.len() as u64;

    let match_rate = if total_jobs == 0 {
        Decimal::ZERO
    } else {
        (Decimal::from(match_count) * Decimal::from(100) / Decimal::from(total_jobs)).round_dp(2)
    };

    let match_revenue: Decimal = matches.iter().filter_map(|m| m.job_value).sum();
    let revenue_per_mailer = if total_mail == 0 { Decimal::ZERO } else { match_revenue / Decimal::from(total_mail) };
    let avg_ticket_per_match = if match_count == 0 { Decimal::ZERO } else { match_revenue / Decimal::from(match_count) };

    let mut days: Vec<i64> = matches
        .iter()
        .filter_map(|m| {
            let latest_mail = m.matched_mail_dates.iter().max()?;
            let delta = (m.crm_job_date - *latest_mail).num_days();
            if delta >= 0 {
                Some(delta)
            } else {
                None
            }
        })
        .collect();
    days.sort();
    let median_days_to_convert = if days.is_empty() {
        0
    } else if days.len() % 2 == 1 {
        days[days.len() / 2]
    } else {
        let mid = days.len() / 2;
        (days[mid - 1] + days[mid]) / 2
    };

    let kpis = RunKpis {
        total_mail,
        unique_mail_addresses,
        total_jobs,
        matches: match_count,
        match_rate,
        match_revenue,
        revenue_per_mailer,
        avg_ticket_per_match,
        median_days_to_convert,
    };

    let mut mailers_by_month: HashMap<String, u64> = HashMap::new();
    for m in mail {
        *mailers_by_month.entry(ym(m.sent_date.format("%Y").to_string().parse().unwrap(), m.sent_date.format("%m").to_string().parse().unwrap())).or_insert(0) += 1;
    }
    let mut jobs_by_month: HashMap<String, u64> = HashMap::new();
    for c in crm {
        *jobs_by_month.entry(ym(c.job_date.format("%Y").to_string().parse().unwrap(), c.job_date.format("%m").to_string().parse().unwrap())).or_insert(0) += 1;
    }
    let mut matches_by_month: HashMap<String, u64> = HashMap::new();
    for m in &matches {
        *matches_by_month.entry(ym(m.crm_job_date.format("%Y").to_string().parse().unwrap(), m.crm_job_date.format("%m").to_string().parse().unwrap())).or_insert(0) += 1;
    }

    let mut months: Vec<String> = mailers_by_month
        .keys()
        .chain(jobs_by_month.keys())
        .chain(matches_by_month.keys())
        .cloned()
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();
    months.sort();

    let graph = RunSeries {
        mailers: months_series(&months, &mailers_by_month),
        jobs: months_series(&months, &jobs_by_month),
        matches: months_series(&months, &matches_by_month),
        yoy: yoy_overlay(&matches_by_month),
        months,
    };

    let mail_addresses_by_city: HashMap<String, HashSet<String>> = mail
        .iter()
        .into_group_map_by(|m| m.city.to_lowercase())
        .into_iter()
        .map(|(city, rows)| (city, rows.into_iter().map(|r| r.full_address.clone()).collect()))
        .collect();

    let mut top_cities: Vec<TopCity> = matches
        .iter()
        .into_group_map_by(|m| m.crm_city.to_lowercase())
        .into_iter()
        .map(|(city, rows)| {
            let count = rows.len() as u64;
            let denom = mail_addresses_by_city.get(&city).map(|s| s.len() as u64).unwrap_or(0);
            let rate = if denom == 0 {
                Decimal::ZERO
            } else {
                (Decimal::from(count) * Decimal::from(100) / Decimal::from(denom)).round_dp(2)
            };
            TopCity { city, matches: count, match_rate: rate }
        })
        .collect();
    top_cities.sort_by(|a, b| b.matches.cmp(&a.matches));

    let mut top_zips: Vec<TopZip> = matches
        .iter()
        .into_group_map_by(|m| if !m.zip5.is_empty() { m.zip5.clone() } else { zip5(&m.crm_zip) })
        .into_iter()
        .map(|(z, rows)| TopZip { zip5: z, matches: rows.len() as u64 })
        .collect();
    top_zips.sort_by(|a, b| b.matches.cmp(&a.matches));

    ResultPayloadV1 {
        run_id: run_id.to_string(),
        kpis,
        graph,
        top_cities,
        top_zips,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn mail_row(addr: &str, city: &str, date: (i32, u32, u32)) -> StagedMail {
        StagedMail {
            run_id: "r1".into(), user_id: "u1".into(), line_no: 1,
            mail_key: "mk_x".into(), source_id: Some("M1".into()),
            address1: addr.into(), address2: None, city: city.into(), state: "TX".into(),
            zip: "78701".into(), full_address: format!("{addr} {city}").to_lowercase(),
            sent_date: NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap(),
        }
    }

    fn match_row(job_index: &str, crm_city: &str, mail_date: (i32, u32, u32), job_date: (i32, u32, u32), value: i64) -> MatchRecord {
        MatchRecord {
            run_id: "r1".into(), user_id: "u1".into(), job_index: job_index.into(), crm_line_no: 1,
            crm_job_date: NaiveDate::from_ymd_opt(job_date.0, job_date.1, job_date.2).unwrap(),
            job_value: Some(Decimal::new(value, 0)),
            crm_city: crm_city.into(), crm_state: "TX".into(), crm_zip: "78701".into(),
            crm_full_address: "x".into(), mail_full_address: "x".into(),
            mail_ids: vec!["M1".into()],
            matched_mail_dates: vec![NaiveDate::from_ymd_opt(mail_date.0, mail_date.1, mail_date.2).unwrap()],
            confidence_percent: 100, match_notes: "perfect match".into(),
            zip5: "78701".into(), state: "TX".into(),
        }
    }

    #[test]
    fn e1_median_days_to_convert() {
        let mail = vec![mail_row("123 Main St", "Austin", (2024, 3, 1))];
        let crm = vec![];
        let matches = vec![match_row("J1", "Austin", (2024, 3, 1), (2024, 4, 15), 500)];
        let result = aggregate("r1", &mail, &crm, &matches);
        assert_eq!(result.kpis.median_days_to_convert, 45);
        assert_eq!(result.kpis.matches, 1);
    }

    #[test]
    fn median_days_to_convert_averages_the_two_middle_values_for_even_counts() {
        let mail = vec![
            mail_row("1 A St", "Austin", (2024, 1, 1)),
            mail_row("2 B St", "Austin", (2024, 1, 1)),
        ];
        let crm = vec![];
        // Deltas: 10, 20, 30 -> even count would be e.g. 10/20; here we use
        // three matches with deltas 10, 20, 40 so the median of four deltas
        // (10, 20, 30, 40) averages the two middle ones to 25.
        let matches = vec![
            match_row("J1", "Austin", (2024, 1, 1), (2024, 1, 11), 100),
            match_row("J2", "Austin", (2024, 1, 1), (2024, 1, 21), 100),
            match_row("J3", "Austin", (2024, 1, 1), (2024, 1, 31), 100),
            match_row("J4", "Austin", (2024, 1, 1), (2024, 2, 10), 100),
        ];
        let result = aggregate("r1", &mail, &crm, &matches);
        assert_eq!(result.kpis.median_days_to_convert, 25);
    }

    #[test]
    fn zero_jobs_yields_zero_match_rate_not_panic() {
        let result = aggregate("r1", &[], &[], &[]);
        assert_eq!(result.kpis.match_rate, Decimal::ZERO);
        assert_eq!(result.kpis.total_jobs, 0);
    }

    #[test]
    fn kpi_matches_equals_sum_of_graph_matches() {
        let mail = vec![mail_row("1 A St", "Austin", (2024, 1, 1)), mail_row("2 B St", "Dallas", (2024, 2, 1))];
        let matches = vec![
            match_row("J1", "Austin", (2024, 1, 1), (2024, 1, 15), 100),
            match_row("J2", "Dallas", (2024, 2, 1), (2024, 2, 20), 200),
        ];
        let result = aggregate("r1", &mail, &[], &matches);
        let graph_sum: u64 = result.graph.matches.iter().sum();
        assert_eq!(graph_sum, result.kpis.matches);
    }

    #[test]
    fn top_cities_sorted_descending_by_count() {
        let mail = vec![mail_row("1 A St", "Austin", (2024, 1, 1))];
        let matches = vec![
            match_row("J1", "Austin", (2024, 1, 1), (2024, 1, 15), 100),
            match_row("J2", "Austin", (2024, 1, 1), (2024, 1, 20), 100),
            match_row("J3", "Houston", (2024, 1, 1), (2024, 1, 25), 100),
        ];
        let result = aggregate("r1", &mail, &[], &matches);
        assert_eq!(result.top_cities[0].city, "austin");
        assert_eq!(result.top_cities[0].matches, 2);
    }
}
