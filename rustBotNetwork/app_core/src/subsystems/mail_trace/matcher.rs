use std::cmp::Ordering;
use std::collections::HashMap;

use chrono::NaiveDate;

use super::config;
use super::contracts::{ExcludedRow, ExclusionReason, MatchRecord, StagedCrm, StagedMail};
use super::normalize::{block_key, directional_in, normalize_address1, street_type_of, token_set_ratio, zip5};

/// # NDOC
/// component: `subsystems::mail_trace::matcher`
/// purpose: Block + date-window + token-set scoring + deterministic
///   bonuses (C5). For each CRM row, picks at most one winning mail row
///   and collects the full set of in-window mail contacts. Bucketed, not
///   a full cross-product — O(|CRM| x average bucket size).

struct MailIndexEntry<'a> {
    index: usize,
    row: &'a StagedMail,
    addr_norm: String,
    zip5: String,
    city_l: String,
    state_l: String,
}

fn build_index(mail: &[StagedMail]) -> Vec<MailIndexEntry<'_>> {
    mail.iter()
        .enumerate()
        .map(|(index, row)| MailIndexEntry {
            index,
            row,
            addr_norm: normalize_address1(&row.address1),
            zip5: zip5(&row.zip),
            city_l: row.city.to_lowercase(),
            state_l: row.state.to_lowercase(),
        })
        .collect()
}

fn bucket_by_block(index: &[MailIndexEntry]) -> HashMap<String, Vec<usize>> {
    let mut m: HashMap<String, Vec<usize>> = HashMap::new();
    for e in index {
        m.entry(block_key(&e.addr_norm)).or_default().push(e.index);
    }
    m
}

fn bucket_by_zip(index: &[MailIndexEntry]) -> HashMap<String, Vec<usize>> {
    let mut m: HashMap<String, Vec<usize>> = HashMap::new();
    for e in index {
        if !e.zip5.is_empty() {
            m.entry(e.zip5.clone()).or_default().push(e.index);
        }
    }
    m
}

fn candidate_set<'a>(
    crm_blk: &str,
    crm_zip5: &str,
    by_block: &HashMap<String, Vec<usize>>,
    by_zip: &HashMap<String, Vec<usize>>,
    index: &[MailIndexEntry<'a>],
) -> Vec<usize> {
    if let Some(v) = by_block.get(crm_blk) {
        if !v.is_empty() {
            return v.clone();
        }
    }
    if !crm_zip5.is_empty() {
        if let Some(v) = by_zip.get(crm_zip5) {
            if !v.is_empty() {
                return v.clone();
            }
        }
    }
    index.iter().map(|e| e.index).collect()
}

fn fast_filter(candidates: &[usize], index: &[MailIndexEntry], crm_zip5: &str, crm_city_l: &str, crm_state_l: &str) -> Vec<usize> {
    let filtered: Vec<usize> = candidates
        .iter()
        .copied()
        .filter(|&i| {
            let e = &index[i];
            let zip_conflict = !crm_zip5.is_empty() && !e.zip5.is_empty() && e.zip5 != crm_zip5;
            let city_state_conflict = !crm_city_l.is_empty()
                && !crm_state_l.is_empty()
                && !e.city_l.is_empty()
                && !e.state_l.is_empty()
                && (e.city_l != crm_city_l || e.state_l != crm_state_l);
            !(zip_conflict || city_state_conflict)
        })
        .collect();
    if filtered.is_empty() {
        candidates.to_vec()
    } else {
        filtered
    }
}

fn bonus(crm_zip5: &str, crm_city_l: &str, crm_state_l: &str, e: &MailIndexEntry) -> i32 {
    let mut b = 0;
    if !crm_zip5.is_empty() && crm_zip5 == e.zip5 {
        b += 5;
    }
    if !crm_city_l.is_empty() && crm_city_l == e.city_l {
        b += 2;
    }
    if !crm_state_l.is_empty() && crm_state_l == e.state_l {
        b += 2;
    }
    b
}

fn notes_for(crm_addr1: &str, mail_addr1: &str) -> String {
    let crm_tokens = crate::subsystems::mail_trace::normalize::tokens(crm_addr1);
    let mail_tokens = crate::subsystems::mail_trace::normalize::tokens(mail_addr1);

    let mut flags = Vec::new();

    let crm_street = street_type_of(&crm_tokens);
    let mail_street = street_type_of(&mail_tokens);
    if crm_street != mail_street {
        flags.push(format!(
            "{} vs {} (street type)",
            mail_street.as_deref().unwrap_or("none"),
            crm_street.as_deref().unwrap_or("none"),
        ));
    }

    let crm_dir = directional_in(&crm_tokens);
    let mail_dir = directional_in(&mail_tokens);
    if crm_dir != mail_dir {
        flags.push(format!(
            "{} vs {} (direction)",
            mail_dir.as_deref().unwrap_or("none"),
            crm_dir.as_deref().unwrap_or("none"),
        ));
    }

    let crm_unit = crm_tokens.iter().find(|t| t.starts_with('#'));
    let mail_unit = mail_tokens.iter().find(|t| t.starts_with('#'));
    if crm_unit != mail_unit {
        flags.push(format!(
            "{} vs {} (unit)",
            mail_unit.map(|s| s.as_str()).unwrap_or("none"),
            crm_unit.map(|s| s.as_str()).unwrap_or("none"),
        ));
    }

    if flags.is_empty() {
        "perfect match".to_string()
    } else {
        flags.join("; ")
    }
}

/// Runs the matcher over every staged CRM row for `run_id`, returning
/// emitted matches and the excluded rows (with reasons).
pub fn run_matching(user_id: &str, mail: &[StagedMail], crm: &[StagedCrm]) -> (Vec<MatchRecord>, Vec<ExcludedRow>) {
    let min_score = config::match_min_score();
    let fast_filters_on = config::fast_filters_enabled();

    let index = build_index(mail);
    let by_block = bucket_by_block(&index);
    let by_zip = bucket_by_zip(&index);

    let mut matches = Vec::new();
    let mut excluded = Vec::new();

    for crm_row in crm {
        let crm_addr_norm = normalize_address1(&crm_row.address1);
        let crm_blk = block_key(&crm_addr_norm);
        let crm_zip5 = zip5(&crm_row.zip);
        let crm_city_l = crm_row.city.to_lowercase();
        let crm_state_l = crm_row.state.to_lowercase();

        let base_candidates = candidate_set(&crm_blk, &crm_zip5, &by_block, &by_zip, &index);
        if base_candidates.is_empty() {
            excluded.push(ExcludedRow { job_index: crm_row.job_index.clone(), reason: ExclusionReason::NoBlockCandidates });
            continue;
        }

        // Mail rows always carry a sent_date here (staging.rs drops
        // undated rows before insert), so the window is a plain <=;
        // the admit-null-dates clause of §4.5 step 1b has no live case.
        let date_windowed: Vec<usize> = base_candidates
            .iter()
            .copied()
            .filter(|&i| index[i].row.sent_date <= crm_row.job_date)
            .collect();
        if date_windowed.is_empty() {
            excluded.push(ExcludedRow { job_index: crm_row.job_index.clone(), reason: ExclusionReason::NoDateWindowCandidates });
            continue;
        }

        let final_candidates = if fast_filters_on {
            fast_filter(&date_windowed, &index, &crm_zip5, &crm_city_l, &crm_state_l)
        } else {
            date_windowed
        };

        let mut scored: Vec<(usize, i32)> = final_candidates
            .iter()
            .map(|&i| {
                let e = &index[i];
                let base = (token_set_ratio(&crm_addr_norm, &e.addr_norm) * 100.0).round() as i32;
                let adjusted = (base + bonus(&crm_zip5, &crm_city_l, &crm_state_l, e)).min(100);
                (i, adjusted)
            })
            .collect();

        scored.sort_by(|a, b| {
            match b.1.cmp(&a.1) {
                Ordering::Equal => {
                    let da = index[a.0].row.sent_date;
                    let db = index[b.0].row.sent_date;
                    da.cmp(&db).then(a.0.cmp(&b.0))
                }
                other => other,
            }
        });

        let (winner_idx, winner_score) = scored[0];

        let mut mail_ids: Vec<String> = final_candidates
            .iter()
            .filter_map(|&i| index[i].row.source_id.clone())
            .filter(|s| !s.trim().is_empty())
            .collect();
        mail_ids.sort();
        mail_ids.dedup();

        let mut matched_mail_dates: Vec<NaiveDate> =
            final_candidates.iter().map(|&i| index[i].row.sent_date).collect();
        matched_mail_dates.sort();
        matched_mail_dates.dedup();

        if winner_score < min_score {
            excluded.push(ExcludedRow { job_index: crm_row.job_index.clone(), reason: ExclusionReason::BelowMinScore });
            continue;
        }

        let winner = &index[winner_idx].row;
        let notes = notes_for(&crm_row.address1, &winner.address1);

        matches.push(MatchRecord {
            run_id: crm_row.run_id.clone(),
            user_id: user_id.to_string(),
            job_index: crm_row.job_index.clone(),
            crm_line_no: crm_row.line_no,
            crm_job_date: crm_row.job_date,
            job_value: crm_row.job_value,
            crm_city: crm_row.city.clone(),
            crm_state: crm_row.state.clone(),
            crm_zip: crm_row.zip.clone(),
            crm_full_address: crm_row.full_address.clone(),
            mail_full_address: winner.full_address.clone(),
            mail_ids,
            matched_mail_dates,
            confidence_percent: winner_score.clamp(0, 100) as u8,
            match_notes: notes,
            zip5: crm_zip5,
            state: crm_row.state.chars().take(2).collect::<String>().to_uppercase(),
        });
    }

    (matches, excluded)
}
