use criterion::{criterion_group, criterion_main, Criterion};
use inostar::file_manager::sanitize_filename;
use inostar::html_parser::classify_source;
use inostar::{extract_image_refs, rewrite_images, FetchOutcome, FetchReport, FetchStatus, Page};
use std::hint::black_box;
use std::path::Path;

fn sample_html() -> String {
    let mut html = String::from("<html><head><title>Bench</title></head><body>");
    for i in 0..50 {
        html.push_str(&format!(
            r#"<p>Paragraph {i}</p><img src="https://cdn.example.com/img/{i}.jpg" loading="lazy" srcset="https://cdn.example.com/img/{i}@2x.jpg 2x">"#
        ));
        html.push_str(&format!(r#"<img src="https://cdn.example.com/img/{}.jpg">"#, i % 10));
    }
    html.push_str(r#"<img src="data:image/png;base64,xx"><img src="/relative.png"></body></html>"#);
    html
}

fn bench_image_extraction(c: &mut Criterion) {
    let html = sample_html();
    let page = Page::parse(&html);

    c.bench_function("extract_image_refs", |b| {
        b.iter(|| {
            let _refs = extract_image_refs(black_box(&page), Path::new("images"));
        });
    });
}

fn bench_image_rewriting(c: &mut Criterion) {
    let html = sample_html();
    let refs = extract_image_refs(&Page::parse(&html), Path::new("images"));
    let report: FetchReport = refs
        .into_iter()
        .map(|image| FetchOutcome {
            image,
            status: FetchStatus::Downloaded,
        })
        .collect();

    c.bench_function("rewrite_images", |b| {
        b.iter(|| {
            let page = Page::parse(black_box(&html));
            rewrite_images(&page, &report);
        });
    });
}

fn bench_source_classification(c: &mut Criterion) {
    let sources = vec![
        "https://example.com/a.jpg",
        "http://example.com/path/to/image.png?size=large",
        "data:image/png;base64,iVBORw0KGgo",
        "ftp://example.com/a.jpg",
        "/relative/image.gif",
        "",
    ];

    c.bench_function("classify_sources", |b| {
        b.iter(|| {
            for src in &sources {
                let _kind = classify_source(black_box(src));
            }
        });
    });
}

fn bench_filename_sanitization(c: &mut Criterion) {
    let titles = vec![
        "normal title",
        "title: with colon",
        "what/why?",
        r#"<quoted> "title" | pipe * star \ back"#,
    ];

    c.bench_function("sanitize_filenames", |b| {
        b.iter(|| {
            for title in &titles {
                let _name = sanitize_filename(black_box(title));
            }
        });
    });
}

criterion_group!(
    benches,
    bench_image_extraction,
    bench_image_rewriting,
    bench_source_classification,
    bench_filename_sanitization,
);
criterion_main!(benches);
