use crate::articles::Article;

/// Characters of article body sent for enrichment
const ENRICH_BODY_CHARS: usize = 1000;

/// Articles described in an assistant prompt
pub const CHAT_CONTEXT_ARTICLES: usize = 5;

/// Characters of article body quoted per article in an assistant prompt
const CHAT_EXCERPT_CHARS: usize = 200;

/// Build the prompt for a one-paragraph article summary
pub fn build_summary_prompt(title: &str, body: &str) -> String {
    format!(
        "Generate a concise, objective summary of the following news article, keeping a formal tone:\n\nTitle: {}\n\nContent: {}",
        title, body
    )
}

/// Build the metadata extraction prompt for an incomplete article
pub fn build_enrichment_prompt(article: &Article) -> String {
    let body: String = article.body.chars().take(ENRICH_BODY_CHARS).collect();

    format!(
        r#"Analyze the following news article and extract structured information.
Respond ONLY with a valid JSON object, no additional text.

ARTICLE:
- Title: {}
- Content: {}
- URL: {}

Return this JSON object:

{{
  "imagen_url": "URL of the main image of the article",
  "pais": "Country the article belongs to (e.g. Peru, Colombia, Argentina, Spain, Mexico)",
  "region": "Region or department (e.g. Lima, Puno, Arequipa, Cusco)",
  "ciudad": "Specific city mentioned (e.g. Juliaca, Lima, Arequipa)",
  "categoria": "Main category",
  "tipo_noticia": "Article type",
  "idioma": "Article language",
  "tags": ["tag1", "tag2", "tag3"]
}}

RULES:
1. categoria MUST be one of: {}
2. tipo_noticia MUST be one of: {}
3. idioma MUST be one of: {}
4. Use null for any value you cannot determine
5. Tags are relevant keywords
6. Respond ONLY with the JSON object"#,
        article.title,
        body,
        article.source_url,
        crate::enrichment::VALID_CATEGORIES.join(", "),
        crate::enrichment::VALID_NEWS_TYPES.join(", "),
        crate::enrichment::VALID_LANGUAGES.join(", "),
    )
}

/// Build the news-assistant prompt around the articles found for a message
pub fn build_chat_prompt(user_message: &str, articles: &[Article]) -> String {
    let mut prompt = format!(
        "You are the virtual assistant of a news portal. Help readers find relevant news and answer questions about it. Reply in the reader's language.\n\nThe reader asks: \"{}\"\n\n",
        user_message
    );

    if articles.is_empty() {
        prompt.push_str(
            "No stored articles match this topic. Suggest that the reader:\n\
             1. Rephrase the question\n\
             2. Browse a specific category\n\
             3. Look at the latest news\n\n\
             Be friendly and offer useful alternatives.",
        );
        return prompt;
    }

    prompt.push_str(&format!(
        "{} relevant articles were found in the portal:\n\n",
        articles.len()
    ));
    for (index, article) in articles.iter().take(CHAT_CONTEXT_ARTICLES).enumerate() {
        let excerpt: String = article.body.chars().take(CHAT_EXCERPT_CHARS).collect();
        prompt.push_str(&format!(
            "Article {}:\n- Title: {}\n- Category: {}\n- Country: {}\n- Published: {}\n- Excerpt: {}...\n\n",
            index + 1,
            article.title,
            article.category.as_deref().unwrap_or("unknown"),
            article.country.as_deref().unwrap_or("unknown"),
            article
                .published_at
                .map(|dt| dt.format("%Y-%m-%d").to_string())
                .unwrap_or_else(|| "unknown".to_string()),
            excerpt,
        ));
    }
    prompt.push_str(
        "Based on these articles, give the reader a short, friendly and useful answer. \
         Mention the most relevant titles and offer more detail.",
    );
    prompt
}
