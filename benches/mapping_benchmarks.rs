use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use indexmap::IndexSet;
use samyama_rml::generator::{generate, MappedValue};
use samyama_rml::mapping::{
    LogicalSource, Mapping, PredicateObjectMap, SourceRef, SubjectMap, TermMap, TriplesMap,
};
use samyama_rml::rdf::vocab::rml;
use samyama_rml::template::Template;
use samyama_rml::{Literal, Mapper, NamedNode, NamedSources, RdfObject, RdfSubject};
use std::collections::HashMap;
use std::sync::Arc;

/// Benchmark template parsing
fn bench_template_parse(c: &mut Criterion) {
    c.bench_function("template_parse", |b| {
        b.iter(|| Template::parse("http://example.org/{country}/city/{name}\\{raw\\}").unwrap());
    });
}

/// Benchmark the cartesian expansion of multi-valued bindings
fn bench_template_evaluate(c: &mut Criterion) {
    let mut group = c.benchmark_group("template_evaluate");
    let template = Template::parse("http://example.org/{a}/{b}").unwrap();

    for width in [1, 10, 50].iter() {
        let values: IndexSet<String> = (0..*width).map(|i| format!("v{}", i)).collect();
        let bindings: HashMap<usize, IndexSet<String>> =
            [(0, values.clone()), (1, values)].into_iter().collect();
        group.bench_with_input(BenchmarkId::from_parameter(width), width, |b, _| {
            b.iter(|| template.evaluate(&bindings));
        });
    }
    group.finish();
}

/// Benchmark statement generation for one record
fn bench_statement_product(c: &mut Criterion) {
    let mut group = c.benchmark_group("statement_product");

    for size in [1, 4, 16].iter() {
        let subjects: Vec<_> = (0..*size)
            .map(|i| {
                MappedValue::new(RdfSubject::from(
                    NamedNode::new(format!("http://example.org/s{}", i)).unwrap(),
                ))
            })
            .collect();
        let predicates = vec![MappedValue::new(
            NamedNode::new("http://example.org/p").unwrap(),
        )];
        let objects: Vec<_> = (0..*size)
            .map(|i| MappedValue::new(RdfObject::from(Literal::new_simple_literal(format!("o{}", i)))))
            .collect();

        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| generate(&subjects, &predicates, &objects, &[], |g| g).unwrap());
        });
    }
    group.finish();
}

/// Benchmark an end-to-end CSV mapping
fn bench_csv_mapping(c: &mut Criterion) {
    let mut group = c.benchmark_group("csv_mapping");
    let runtime = tokio::runtime::Runtime::new().unwrap();

    for rows in [100, 1000, 10_000].iter() {
        let mut csv = String::from("id,name\n");
        for i in 0..*rows {
            csv.push_str(&format!("{},Person{}\n", i, i));
        }
        let sources = NamedSources::new().with_bytes("people.csv", csv);
        let mapper = runtime.block_on(async {
            Mapper::builder()
                .source_resolver(sources)
                .build()
                .await
                .unwrap()
        });
        let mapping = Mapping::new(vec![TriplesMap::new(
            "people",
            Arc::new(
                LogicalSource::new(SourceRef::new("people.csv"))
                    .with_reference_formulation(rml::CSV),
            ),
            SubjectMap::new(TermMap::template("http://example.org/person/{id}").unwrap()),
        )
        .with_predicate_object_map(
            PredicateObjectMap::new()
                .with_predicate(TermMap::iri("http://xmlns.com/foaf/0.1/name").unwrap())
                .with_object(TermMap::reference("name")),
        )])
        .unwrap();

        group.bench_with_input(BenchmarkId::from_parameter(rows), rows, |b, _| {
            b.iter(|| runtime.block_on(mapper.map_to_vec(&mapping)).unwrap());
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_template_parse,
    bench_template_evaluate,
    bench_statement_product,
    bench_csv_mapping
);
criterion_main!(benches);
