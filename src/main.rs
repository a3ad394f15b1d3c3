use anyhow::Context;
use futures::StreamExt;
use samyama_rml::mapping::{
    LogicalSource, Mapping, PredicateObjectMap, RefObjectMap, SourceRef, SubjectMap, TermMap,
    TriplesMap,
};
use samyama_rml::rdf::vocab::{ql, rml};
use samyama_rml::{EngineConfig, Mapper, NamedNode, NamedSources};
use std::sync::Arc;

const PEOPLE_CSV: &str = "id,name,team\n1,Ada Lovelace,analytical\n2,Grace Hopper,compilers\n3,Alan Turing,\n";

const TEAMS_JSON: &str = r#"{
  "teams": [
    {"code": "analytical", "label": "Analytical Engine", "tags": ["hardware", "math"]},
    {"code": "compilers", "label": "Compilers", "tags": ["software"]}
  ]
}"#;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    println!("Samyama RML v{}", samyama_rml::version());
    println!("==========================================");
    println!();

    let config = match std::env::args().nth(1) {
        Some(path) => EngineConfig::from_file(&path)
            .with_context(|| format!("loading configuration from {}", path))?,
        None => EngineConfig::default(),
    };
    println!("Join store: {:?}", config.join_store);
    println!();

    let sources = NamedSources::new()
        .with_bytes("people.csv", PEOPLE_CSV)
        .with_bytes("teams.json", TEAMS_JSON);

    let mapper = Mapper::builder()
        .config(config)
        .source_resolver(sources)
        .build()
        .await?;

    let mapping = demo_mapping()?;
    let mut statements = mapper.map(&mapping)?;
    let mut count = 0usize;
    while let Some(statement) = statements.next().await {
        println!("{}", statement?.quad);
        count += 1;
    }

    println!();
    println!("✓ Generated {} statements", count);
    Ok(())
}

fn demo_mapping() -> anyhow::Result<Mapping> {
    let teams = TriplesMap::new(
        "teams",
        Arc::new(
            LogicalSource::new(SourceRef::new("teams.json"))
                .with_iterator("$.teams[*]")
                .with_reference_formulation(ql::JSON_PATH),
        ),
        SubjectMap::new(TermMap::template("http://example.org/team/{code}")?)
            .with_class(NamedNode::new("http://example.org/Team")?),
    )
    .with_predicate_object_map(
        PredicateObjectMap::new()
            .with_predicate(TermMap::iri("http://www.w3.org/2000/01/rdf-schema#label")?)
            .with_object(TermMap::reference("label")),
    )
    .with_predicate_object_map(
        PredicateObjectMap::new()
            .with_predicate(TermMap::iri("http://example.org/tag")?)
            .with_object(TermMap::reference("tags")),
    );

    let people = TriplesMap::new(
        "people",
        Arc::new(
            LogicalSource::new(SourceRef::new("people.csv")).with_reference_formulation(rml::CSV),
        ),
        SubjectMap::new(TermMap::template("http://example.org/person/{id}")?)
            .with_class(NamedNode::new("http://xmlns.com/foaf/0.1/Person")?),
    )
    .with_predicate_object_map(
        PredicateObjectMap::new()
            .with_predicate(TermMap::iri("http://xmlns.com/foaf/0.1/name")?)
            .with_object(TermMap::reference("name")),
    )
    .with_predicate_object_map(
        PredicateObjectMap::new()
            .with_predicate(TermMap::iri("http://example.org/memberOf")?)
            .with_ref_object(RefObjectMap::new("teams").with_join("team", "code")),
    );

    Ok(Mapping::new(vec![people, teams])?)
}
