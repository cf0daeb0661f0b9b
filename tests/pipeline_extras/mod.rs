use std::io::{Cursor, Read, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use llm::{
    chat::{ChatMessage, ChatProvider, ChatResponse, Tool},
    error::LLMError,
};
use sitemorph::pipeline::{Models, RunConfig, RunReport, run};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use url::Url;
use zip::ZipArchive;
use zip::write::SimpleFileOptions;

pub(crate) const FAQ_LAYOUT: &str = r#"<!DOCTYPE html>
<html lang="en"><head><meta charset="utf-8"><title>{{TITLE}}</title>
<meta name="description" content="{{META_DESCRIPTION}}">
<style>body { font-family: sans-serif; margin: 0; } .hero { padding: 4rem 2rem; }
@media (max-width: 600px) { .hero { padding: 2rem 1rem; } }</style></head>
<body>
<header><nav><a href="/">Home</a> <a href="/contact">Contact</a></nav></header>
<main>
<section class="hero"><h1>{{H1}}</h1><p>{{INTRO}}</p><img src="/img/hero.jpg" alt="hero"></section>
<section>{{SECTION1}}</section>
<section id="faq">{{FAQ}}</section>
</main>
<footer><a class="button" href="/contact">{{CTA}}</a></footer>
{{SCHEMA}}
</body></html>"#;

pub(crate) const SCHEMA: &str = r#"<script type="application/ld+json">{"@context":"https://schema.org","@type":"FAQPage","mainEntity":[]}</script>"#;

const INSTRUCTIONS_MARKER: &str = "\n\nThe HTML above is a LOCKED TEMPLATE";

pub(crate) fn no_faq_layout() -> String {
    FAQ_LAYOUT
        .replace(r#"<section id="faq">{{FAQ}}</section>"#, "")
        .replace("{{SCHEMA}}", "")
}

/// Text of the last message of a request.
pub(crate) fn prompt(messages: &[ChatMessage]) -> &str {
    messages
        .last()
        .map(|message| message.content.as_str())
        .unwrap_or_default()
}

/// Value of a `Field: value` line of the content instruction.
pub(crate) fn prompt_field<'a>(messages: &'a [ChatMessage], field: &str) -> Option<&'a str> {
    let prefix = format!("{field}: ");
    prompt(messages)
        .lines()
        .rev()
        .find_map(|line| line.strip_prefix(prefix.as_str()))
}

/// Behaves like a well-mannered model: fills the placeholders of the layout
/// embedded in the request and adds structured data only when asked to.
pub(crate) fn fill_page(messages: &[ChatMessage], fabricate_schema: bool) -> String {
    let text = prompt(messages);
    let layout = text.split(INSTRUCTIONS_MARKER).next().unwrap_or_default();
    let keyword = prompt_field(messages, "Keyword").unwrap_or("keyword");
    let city = prompt_field(messages, "City").unwrap_or("not specified");
    let asked = text.contains("FAQPage");

    let page = layout
        .replace("{{TITLE}}", &format!("{keyword} in {city}"))
        .replace("{{META_DESCRIPTION}}", &format!("Trusted {keyword} services in {city}."))
        .replace("{{H1}}", &format!("{keyword} in {city}"))
        .replace(
            "{{INTRO}}",
            &format!("Fast, licensed {keyword} help across {city}. ").repeat(5),
        )
        .replace(
            "{{SECTION1}}",
            &format!("<h2>Why choose our {keyword}</h2><p>Local crews in {city}.</p>"),
        )
        .replace("{{FAQ}}", "<h3>Do you work weekends?</h3><p>Yes.</p>")
        .replace("{{CTA}}", "Call now")
        .replace("{{SCHEMA}}", if asked { SCHEMA } else { "" });

    if fabricate_schema && !asked {
        page.replace("</body>", &format!("{SCHEMA}\n</body>"))
    } else {
        page
    }
}

type Responder = dyn Fn(&[ChatMessage]) -> Result<String, LLMError> + Send + Sync;

pub(crate) struct StubLlmProvider {
    responder: Box<Responder>,
    calls: AtomicUsize,
    message_counts: Mutex<Vec<usize>>,
}

impl StubLlmProvider {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&[ChatMessage]) -> Result<String, LLMError> + Send + Sync + 'static,
    {
        StubLlmProvider {
            responder: Box::new(responder),
            calls: AtomicUsize::new(0),
            message_counts: Mutex::new(Vec::new()),
        }
    }

    /// A model that always answers with `response`.
    pub fn fixed(response: &str) -> Self {
        let response = response.to_owned();
        Self::new(move |_| Ok(response.clone()))
    }

    /// A model that fills the layout it is given.
    pub fn filling() -> Self {
        Self::new(|messages| Ok(fill_page(messages, false)))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn message_counts(&self) -> Vec<usize> {
        self.message_counts
            .lock()
            .expect("message counts lock")
            .clone()
    }

    fn respond(&self, messages: &[ChatMessage]) -> Result<String, LLMError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.message_counts
            .lock()
            .expect("message counts lock")
            .push(messages.len());
        (self.responder)(messages)
    }
}

impl ChatProvider for StubLlmProvider {
    fn chat<'life0, 'life1, 'async_trait>(
        &'life0 self,
        messages: &'life1 [ChatMessage],
    ) -> ::core::pin::Pin<
        Box<
            dyn ::core::future::Future<Output = Result<Box<dyn ChatResponse>, LLMError>>
                + ::core::marker::Send
                + 'async_trait,
        >,
    >
    where
        'life0: 'async_trait,
        'life1: 'async_trait,
        Self: 'async_trait,
    {
        let result = self.respond(messages);

        Box::pin(async move {
            #[derive(Debug)]
            struct StringResponse(String);

            impl ChatResponse for StringResponse {
                fn text(&self) -> Option<String> {
                    Some(self.0.clone())
                }

                fn tool_calls(&self) -> Option<Vec<llm::ToolCall>> {
                    None
                }

                fn thinking(&self) -> Option<String> {
                    None
                }

                fn usage(&self) -> Option<llm::chat::Usage> {
                    None
                }
            }

            impl std::fmt::Display for StringResponse {
                fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                    write!(formatter, "{}", self.0)
                }
            }

            result.map(|text| Box::new(StringResponse(text)) as Box<dyn ChatResponse>)
        })
    }

    fn chat_with_tools<'life0, 'life1, 'life2, 'async_trait>(
        &'life0 self,
        _messages: &'life1 [ChatMessage],
        _tools: Option<&'life2 [Tool]>,
    ) -> ::core::pin::Pin<
        Box<
            dyn ::core::future::Future<Output = Result<Box<dyn ChatResponse>, LLMError>>
                + ::core::marker::Send
                + 'async_trait,
        >,
    >
    where
        'life0: 'async_trait,
        'life1: 'async_trait,
        'life2: 'async_trait,
        Self: 'async_trait,
    {
        panic!()
    }
}

/// Runs the pipeline with separate layout and content stubs.
pub(crate) async fn run_with(
    config: &RunConfig,
    layout_model: &StubLlmProvider,
    content_model: &StubLlmProvider,
) -> sitemorph::Result<RunReport> {
    let models = Models {
        layout: layout_model,
        content: content_model,
    };
    let http = reqwest::Client::builder()
        .no_proxy()
        .build()
        .expect("http client");
    run(config, &models, &http).await
}

/// Serves one fixed response to every request on a local port and returns
/// the template URL together with the number of requests received.
pub(crate) async fn serve_template(
    status: &'static str,
    content_type: &'static str,
    body: Vec<u8>,
) -> (Url, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let address = listener.local_addr().expect("local address");
    let requests = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&requests);

    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            let (reader, mut writer) = stream.split();
            let mut lines = BufReader::new(reader).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if line.is_empty() {
                    break;
                }
            }

            let head = format!(
                "HTTP/1.1 {status}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            let _ = writer.write_all(head.as_bytes()).await;
            let _ = writer.write_all(&body).await;
            let _ = writer.shutdown().await;
        }
    });

    let url = Url::parse(&format!("http://{address}/template")).expect("valid url");
    (url, requests)
}

/// A ZIP bundle holding the given files.
pub(crate) fn bundle_bytes(files: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, content) in files {
        writer
            .start_file(*name, SimpleFileOptions::default())
            .expect("start file");
        writer.write_all(content.as_bytes()).expect("write file");
    }
    writer.finish().expect("finish zip").into_inner()
}

/// Entry names and contents of a ZIP archive, sorted by name.
pub(crate) fn archive_entries(bytes: &[u8]) -> Vec<(String, String)> {
    let mut archive = ZipArchive::new(Cursor::new(bytes)).expect("valid zip");
    let mut entries: Vec<(String, String)> = (0..archive.len())
        .map(|index| {
            let mut entry = archive.by_index(index).expect("zip entry");
            let mut content = String::new();
            entry.read_to_string(&mut content).expect("utf-8 entry");
            (entry.name().to_string(), content)
        })
        .collect();
    entries.sort();
    entries
}

pub(crate) fn entry_names(bytes: &[u8]) -> Vec<String> {
    archive_entries(bytes)
        .into_iter()
        .map(|(name, _)| name)
        .collect()
}
