//! Text renderers for professors, reviews, and reply threads.

use crate::app::threads::{ProfessorProfile, ThreadCache};
use crate::domain::{ModuleComparison, ProfessorListing, Reply, Review, ReviewId};
use crate::render::{relative_time, short_preview};
use std::time::SystemTime;

const INDENT: &str = "    ";
const REPLY_PREVIEW_CHARS: usize = 240;

pub fn listing_line(listing: &ProfessorListing) -> String {
    let mut line = format!("#{:<6} {}", listing.id, listing.name);
    let unit = [listing.faculty.as_deref(), listing.department.as_deref()]
        .into_iter()
        .flatten()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" / ");
    if !unit.is_empty() {
        line.push_str(&format!("  ({unit})"));
    }
    if let Some(rating) = listing.average_rating {
        line.push_str(&format!("  {rating:.1}/5"));
    }
    if let Some(count) = listing.review_count {
        line.push_str(&format!(" [{count} reviews]"));
    }
    line
}

/// Name, affiliation, rating summary, and teaching history.
pub fn professor_header(profile: &ProfessorProfile) -> Vec<String> {
    let professor = &profile.professor;
    let mut out = vec![format!("{} (#{})", professor.name, professor.id)];

    let unit = [professor.faculty.as_deref(), professor.department.as_deref()]
        .into_iter()
        .flatten()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>();
    if !unit.is_empty() {
        out.push(unit.join(" / "));
    }

    out.push(match profile.summary {
        Some(summary) if summary.review_count > 0 => format!(
            "Rated {:.1}/5 from {} review{}",
            summary.average_rating.unwrap_or_default(),
            summary.review_count,
            plural(summary.review_count)
        ),
        _ => "No reviews yet".to_owned(),
    });

    if !profile.modules.is_empty() {
        out.push("Modules taught:".to_owned());
        for group in &profile.modules {
            out.push(format!(
                "  {} {}: {}",
                group.module_code,
                group.module_name,
                group.offerings.join(", ")
            ));
        }
    }
    out
}

pub fn review_block(review: &Review, now: SystemTime) -> Vec<String> {
    let mut header = format!(
        "[review {}] {} {}  {}  by {}, {}",
        review.id,
        review.module_code,
        review.module_name,
        review.rating,
        review.author_username,
        relative_time(&review.created_at, now),
    );
    if review.can_edit {
        header.push_str("  (yours)");
    }

    let mut out = vec![header];
    out.extend(review.text.lines().map(|line| format!("{INDENT}{line}")));
    out.push(format!(
        "{INDENT}{} like{}{}  {} repl{}",
        review.likes_count,
        plural(review.likes_count),
        if review.is_liked { " (liked)" } else { "" },
        review.reply_count,
        if review.reply_count == 1 { "y" } else { "ies" },
    ));
    out
}

pub fn reply_line(reply: &Reply, now: SystemTime) -> String {
    let mut line = format!(
        "{INDENT}> [reply {}] {}, {}: {}  ({} like{}{})",
        reply.id,
        reply.author_username,
        relative_time(&reply.created_at, now),
        short_preview(&reply.text, REPLY_PREVIEW_CHARS),
        reply.likes_count,
        plural(reply.likes_count),
        if reply.is_liked { ", liked" } else { "" },
    );
    if reply.can_edit {
        line.push_str("  (yours)");
    }
    line
}

/// A review followed by its loaded replies when the thread is expanded.
pub fn thread_lines(cache: &ThreadCache, review: &Review, now: SystemTime) -> Vec<String> {
    let mut out = review_block(review, now);
    let Some(node) = cache.thread(review.id).filter(|node| node.is_expanded()) else {
        return out;
    };

    let replies = node.replies();
    out.extend(replies.items().iter().map(|reply| reply_line(reply, now)));
    if replies.cursor().has_next() == Some(true) {
        out.push(format!(
            "{INDENT}> ... {} more (page {} loaded)",
            review
                .reply_count
                .saturating_sub(u32::try_from(replies.items().len()).unwrap_or(u32::MAX)),
            replies.cursor().page_number()
        ));
    }
    out
}

/// All cached reviews of `reviews` rendered as threads, separated by blank lines.
pub fn threads_text(cache: &ThreadCache, reviews: &[Review], now: SystemTime) -> String {
    reviews
        .iter()
        .map(|review| thread_lines(cache, review, now).join("\n"))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Reply-only listing for a single review.
pub fn replies_text(cache: &ThreadCache, review_id: ReviewId, now: SystemTime) -> String {
    match cache.thread(review_id) {
        Some(node) if !node.replies().items().is_empty() => node
            .replies()
            .items()
            .iter()
            .map(|reply| reply_line(reply, now))
            .collect::<Vec<_>>()
            .join("\n"),
        _ => format!("{INDENT}(no replies)"),
    }
}

pub fn comparison_lines(comparison: &ModuleComparison) -> Vec<String> {
    let mut out = Vec::new();
    if let Some(code) = &comparison.module_code {
        out.push(code.clone());
    }
    for (semester, professors) in &comparison.semesters {
        out.push(format!("{semester}:"));
        match professors.as_array() {
            Some(entries) => out.extend(entries.iter().map(|entry| {
                let name = entry
                    .get("name")
                    .and_then(|name| name.as_str())
                    .unwrap_or("(unknown)");
                match entry.get("average_rating").and_then(|rating| rating.as_f64()) {
                    Some(rating) => format!("  {name}  {rating:.1}/5"),
                    None => format!("  {name}"),
                }
            })),
            None => out.push(format!("  {professors}")),
        }
    }
    out
}

fn plural(count: u32) -> &'static str {
    if count == 1 { "" } else { "s" }
}
