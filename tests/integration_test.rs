use std::collections::HashMap;
use std::sync::Arc;

use dynquery::expression::node::ExprKind;
use dynquery::{
    evaluate, invoke_lambda, Binding, ClassBuilder, Engine, Instance, ParamDef, ParseError, Query,
    Ty, TypeRegistry, Value,
};

fn user_model() -> (Engine, dynquery::types::ClassRef, dynquery::types::ClassRef) {
    let mut registry = TypeRegistry::with_defaults();
    let profile = ClassBuilder::new("Profile")
        .property("FirstName", Ty::String)
        .property("Age", Ty::Int32)
        .build();
    let user = ClassBuilder::new("User")
        .property("Id", Ty::Int32)
        .property("UserName", Ty::String)
        .property("Profile", Ty::Class(profile.clone()))
        .build();
    registry.register_class(profile.clone());
    registry.register_class(user.clone());
    (Engine::with_registry(registry), user, profile)
}

fn make_user(
    user: &dynquery::types::ClassRef,
    profile: &dynquery::types::ClassRef,
    id: i32,
    name: &str,
    first: &str,
    age: i32,
) -> Value {
    let profile_value = Value::Object(Instance::new(
        profile.clone(),
        vec![Value::String(first.into()), Value::Int32(age)],
    ));
    Value::Object(Instance::new(
        user.clone(),
        vec![Value::Int32(id), Value::String(name.into()), profile_value],
    ))
}

#[test]
fn test_lambda_with_named_parameter() {
    let engine = Engine::new();
    let x = ParamDef::new("x", Ty::Int32);
    let lambda = engine
        .parse_lambda_with(&[x], Some(&Ty::Int32), "x + 1", &[])
        .unwrap();
    assert_eq!(
        invoke_lambda(&lambda, &[Value::Int32(41)]).unwrap(),
        Value::Int32(42)
    );
}

#[test]
fn test_where_with_in_list() {
    let engine = Engine::new();
    let items: Vec<Value> = (1..=100).map(Value::Int32).collect();
    let query = Query::new(&engine, Ty::Int32, items);
    let result = query.where_("it in (2, 4, 6, 8)", &[]).unwrap();
    assert_eq!(
        result.into_items(),
        vec![
            Value::Int32(2),
            Value::Int32(4),
            Value::Int32(6),
            Value::Int32(8)
        ]
    );
}

#[test]
fn test_where_with_substitution_contains() {
    let (engine, user, profile) = user_model();
    let items: Vec<Value> = ["A", "B", "C", "D", "E"]
        .iter()
        .enumerate()
        .map(|(i, name)| make_user(&user, &profile, i as i32, name, name, 20 + i as i32))
        .collect();
    let wanted = Value::seq(
        Ty::String,
        vec![
            Value::String("A".into()),
            Value::String("B".into()),
            Value::String("C".into()),
        ],
    );
    let query = Query::new(&engine, Ty::Class(user), items);
    let result = query
        .where_("@0.Contains(UserName)", &[Binding::Value(wanted)])
        .unwrap();
    let names: Vec<String> = result
        .items()
        .iter()
        .map(|v| match v {
            Value::Object(o) => o.get("UserName").unwrap().to_string(),
            _ => unreachable!(),
        })
        .collect();
    assert_eq!(names, ["A", "B", "C"]);
}

#[test]
fn test_select_into_anonymous_class() {
    let (engine, user, profile) = user_model();
    let items = vec![
        make_user(&user, &profile, 1, "ann42", "Ann", 34),
        make_user(&user, &profile, 2, "bo77", "Bo", 25),
    ];
    let query = Query::new(&engine, Ty::Class(user), items);
    let result = query
        .select("new(UserName as Name, Profile.FirstName)", &[])
        .unwrap();

    let rows = result.into_items();
    assert_eq!(rows.len(), 2);
    match &rows[0] {
        Value::Object(obj) => {
            assert!(obj.class.is_dynamic);
            assert_eq!(obj.get("Name").unwrap(), Value::String("ann42".into()));
            assert_eq!(obj.get("FirstName").unwrap(), Value::String("Ann".into()));
        }
        other => panic!("expected projected object, got {}", other),
    }
    match &rows[1] {
        Value::Object(obj) => {
            assert_eq!(obj.get("Name").unwrap(), Value::String("bo77".into()));
            assert_eq!(obj.get("FirstName").unwrap(), Value::String("Bo".into()));
        }
        other => panic!("expected projected object, got {}", other),
    }
}

#[test]
fn test_wide_tuple_item_access_concat() {
    let engine = Engine::new();
    let expr = engine
        .parse(
            Some(&Ty::String),
            "tuple(1,\"2\",3,44,55,66,777,888.8,999.9,1000).Item1 + tuple(\"ABC\").Item1",
            &[],
        )
        .unwrap();
    assert_eq!(evaluate(&expr).unwrap(), Value::String("1ABC".into()));
}

#[test]
fn test_guid_string_equality() {
    let engine = Engine::new();
    let expr = engine
        .parse(
            Some(&Ty::Bool),
            "\"22222222-7651-4045-962A-3D44DEE71398\" == Guid.Parse(\"{0x22222222,0x7651,0x4045,{0x96,0x2a,0x3d,0x44,0xde,0xe7,0x13,0x98}}\")",
            &[],
        )
        .unwrap();
    assert_eq!(evaluate(&expr).unwrap(), Value::Bool(true));
}

#[test]
fn test_shift_select() {
    let engine = Engine::new();
    let items = vec![Value::Int32(10), Value::Int32(20), Value::Int32(30)];
    let query = Query::new(&engine, Ty::Int32, items.clone());
    assert_eq!(
        query.select("it << 1", &[]).unwrap().into_items(),
        vec![Value::Int32(20), Value::Int32(40), Value::Int32(60)]
    );
    let query = Query::new(&engine, Ty::Int32, items);
    assert_eq!(
        query.select("it >> 1", &[]).unwrap().into_items(),
        vec![Value::Int32(5), Value::Int32(10), Value::Int32(15)]
    );
}

#[test]
fn test_ordering_parse_and_sort() {
    let (engine, user, profile) = user_model();
    let orderings = engine
        .parse_ordering(&Ty::Class(user.clone()), "Profile.Age DESC, Id", &[])
        .unwrap();
    assert_eq!(orderings.len(), 2);
    assert!(!orderings[0].ascending);
    assert!(orderings[1].ascending);

    let items = vec![
        make_user(&user, &profile, 1, "a", "A", 30),
        make_user(&user, &profile, 2, "b", "B", 40),
        make_user(&user, &profile, 3, "c", "C", 30),
    ];
    let query = Query::new(&engine, Ty::Class(user), items);
    let sorted = query.order_by("Profile.Age DESC, Id", &[]).unwrap();
    let ids: Vec<Value> = sorted
        .items()
        .iter()
        .map(|v| match v {
            Value::Object(o) => o.get("Id").unwrap(),
            _ => unreachable!(),
        })
        .collect();
    assert_eq!(ids, vec![Value::Int32(2), Value::Int32(1), Value::Int32(3)]);
}

#[test]
fn test_ambiguous_widening_requires_explicit_conversion() {
    let mut registry = TypeRegistry::with_defaults();
    let row = ClassBuilder::new("Row")
        .property("FloatValue", Ty::Float)
        .property("DecimalValue", Ty::Decimal)
        .build();
    registry.register_class(row.clone());
    let engine = Engine::with_registry(registry);
    let param = ParamDef::new("", Ty::Class(row));

    let err = engine
        .parse_expression(&param, None, "FloatValue * DecimalValue", &[])
        .unwrap_err();
    assert!(err.downcast_ref::<ParseError>().is_some());

    let expr = engine
        .parse_expression(&param, None, "Decimal(FloatValue) * DecimalValue", &[])
        .unwrap();
    assert_eq!(expr.ty, Ty::Decimal);
}

#[test]
fn test_anonymous_class_identity_across_parses() {
    let (engine, user, profile) = user_model();
    let items = vec![make_user(&user, &profile, 1, "ann", "Ann", 34)];
    let elem = Ty::Class(user);

    let first = engine
        .parse_lambda(&elem, None, "new(UserName as Name, Id)", &[])
        .unwrap();
    let second = engine
        .parse_lambda(&elem, None, "new(userNAME as Name, id)", &[])
        .unwrap();
    let (a, b) = match (first.return_ty(), second.return_ty()) {
        (Ty::Class(a), Ty::Class(b)) => (a.clone(), b.clone()),
        other => panic!("expected classes, got {:?}", other),
    };
    assert!(Arc::ptr_eq(&a, &b));

    // Equal instances of the emitted class compare equal.
    let va = invoke_lambda(&first, &items[..1]).unwrap();
    let vb = invoke_lambda(&second, &items[..1]).unwrap();
    assert_eq!(va, vb);
    assert_eq!(va.hash_code(), vb.hash_code());
}

#[test]
fn test_case_insensitivity_everywhere() {
    let (engine, user, profile) = user_model();
    let items = vec![
        make_user(&user, &profile, 1, "ann", "Ann", 34),
        make_user(&user, &profile, 2, "bo", "Bo", 19),
    ];
    let elem = Ty::Class(user);
    for text in [
        "Profile.Age >= 21",
        "PROFILE.AGE >= 21",
        "profile.age >= 21",
    ] {
        let query = Query::new(&engine, elem.clone(), items.clone());
        let kept = query.where_(text, &[]).unwrap();
        assert_eq!(kept.count(), 1, "{}", text);
    }
}

#[test]
fn test_scope_restoration_after_aggregate() {
    let mut registry = TypeRegistry::with_defaults();
    let order = ClassBuilder::new("Order")
        .property("Total", Ty::Int32)
        .build();
    let customer = ClassBuilder::new("Customer")
        .property("Name", Ty::String)
        .property("Orders", Ty::Seq(Box::new(Ty::Class(order.clone()))))
        .build();
    registry.register_class(order.clone());
    registry.register_class(customer.clone());
    let engine = Engine::with_registry(registry);

    let orders = Value::seq(
        Ty::Class(order.clone()),
        vec![
            Value::Object(Instance::new(order.clone(), vec![Value::Int32(10)])),
            Value::Object(Instance::new(order, vec![Value::Int32(99)])),
        ],
    );
    let customer_value = Value::Object(Instance::new(
        customer.clone(),
        vec![Value::String("Ann".into()), orders],
    ));

    // Name after the aggregate resolves against the outer element again;
    // parent inside the body reaches the customer.
    let lambda = engine
        .parse_lambda(
            &Ty::Class(customer),
            Some(&Ty::Bool),
            "Orders.Any(Total > 50 && parent.Name == \"Ann\") && Name != null",
            &[],
        )
        .unwrap();
    assert_eq!(
        invoke_lambda(&lambda, &[customer_value]).unwrap(),
        Value::Bool(true)
    );
}

#[test]
fn test_externals_dictionary_binding() {
    let engine = Engine::new();
    let mut map = HashMap::new();
    map.insert("threshold".to_string(), Binding::Value(Value::Int32(5)));
    let items: Vec<Value> = (1..=10).map(Value::Int32).collect();
    let query = Query::new(&engine, Ty::Int32, items);
    let kept = query
        .where_("it > Threshold", &[Binding::Map(map)])
        .unwrap();
    assert_eq!(kept.count(), 5);
}

#[test]
fn test_literal_promotion_soundness() {
    let engine = Engine::new();
    // The literal 300 narrows to Int16 but not to Byte.
    let expr = engine.parse(Some(&Ty::Int16), "300", &[]).unwrap();
    assert_eq!(evaluate(&expr).unwrap(), Value::Int16(300));
    let err = engine.parse(Some(&Ty::Byte), "300", &[]).unwrap_err();
    assert!(err.downcast_ref::<ParseError>().is_some());

    // Double literal text re-parses as decimal losslessly.
    let expr = engine.parse(Some(&Ty::Decimal), "0.1", &[]).unwrap();
    assert_eq!(
        evaluate(&expr).unwrap(),
        Value::Decimal("0.1".parse().unwrap())
    );
}

#[test]
fn test_reparse_yields_equal_tree() {
    let (engine, user, profile) = user_model();
    let elem = Ty::Class(user.clone());
    let a = engine
        .parse_lambda(&elem, None, "Id * 2 + Profile.Age", &[])
        .unwrap();
    let b = engine
        .parse_lambda(&elem, None, "Id * 2 + Profile.Age", &[])
        .unwrap();
    assert_eq!(a.return_ty(), b.return_ty());
    // Observationally equal: same result over the same input.
    let item = make_user(&user, &profile, 7, "x", "X", 3);
    assert_eq!(
        invoke_lambda(&a, std::slice::from_ref(&item)).unwrap(),
        invoke_lambda(&b, std::slice::from_ref(&item)).unwrap()
    );
}

#[test]
fn test_error_positions() {
    let engine = Engine::new();
    let err = engine.parse(None, "1 + \"abc", &[]).unwrap_err();
    let parse_err = err.downcast_ref::<ParseError>().unwrap();
    assert_eq!(parse_err.position, 4);

    let err = engine.parse(None, "(1 + 2", &[]).unwrap_err();
    let parse_err = err.downcast_ref::<ParseError>().unwrap();
    assert_eq!(parse_err.position, 6);
}

#[test]
fn test_iif_and_conditional_agree() {
    let engine = Engine::new();
    let a = engine.parse(None, "iif(2 > 1, \"yes\", \"no\")", &[]).unwrap();
    let b = engine.parse(None, "2 > 1 ? \"yes\" : \"no\"", &[]).unwrap();
    assert_eq!(evaluate(&a).unwrap(), Value::String("yes".into()));
    assert_eq!(evaluate(&a).unwrap(), evaluate(&b).unwrap());
}

#[test]
fn test_aggregate_chain_evaluation() {
    let engine = Engine::new();
    let items: Vec<Value> = (1..=10).map(Value::Int32).collect();
    let seq = Value::seq(Ty::Int32, items);
    let expr = engine
        .parse(
            None,
            "@0.Where(it % 2 == 0).Select(it * it).Sum()",
            &[Binding::Value(seq.clone())],
        )
        .unwrap();
    // 4 + 16 + 36 + 64 + 100
    assert_eq!(evaluate(&expr).unwrap(), Value::Int32(220));

    let expr = engine
        .parse(None, "@0.Average()", &[Binding::Value(seq)])
        .unwrap();
    assert_eq!(evaluate(&expr).unwrap(), Value::Double(5.5));
}

#[test]
fn test_string_to_enum_promotion_and_comparison() {
    let mut registry = TypeRegistry::with_defaults();
    let status = dynquery::EnumDef::new(
        "Status",
        vec![
            ("Pending".into(), 0),
            ("Active".into(), 1),
            ("Closed".into(), 2),
        ],
    );
    registry.register_enum(status.clone());
    let account = ClassBuilder::new("Account")
        .property("State", Ty::Enum(status.clone()))
        .build();
    registry.register_class(account.clone());
    let engine = Engine::with_registry(registry);

    let active = Value::Object(Instance::new(
        account.clone(),
        vec![Value::Enum(status.clone(), 1)],
    ));
    let elem = Ty::Class(account);
    for text in [
        "State == Status.Active",
        "State == \"active\"",
        "State == 1",
        "1 == State",
    ] {
        let lambda = engine
            .parse_lambda(&elem, Some(&Ty::Bool), text, &[])
            .unwrap();
        assert_eq!(
            invoke_lambda(&lambda, &[active.clone()]).unwrap(),
            Value::Bool(true),
            "{}",
            text
        );
    }
}

#[test]
fn test_dynamic_lambda_invocation() {
    let engine = Engine::new();
    let inc = engine
        .parse_lambda(&Ty::Int32, None, "it + 1", &[])
        .unwrap();
    let expr = engine
        .parse(None, "@0(10) * @0(20)", &[Binding::Lambda(inc)])
        .unwrap();
    assert_eq!(evaluate(&expr).unwrap(), Value::Int32(231));
}

#[test]
fn test_expression_substitution() {
    let engine = Engine::new();
    let fragment = engine.parse(None, "3 * 7", &[]).unwrap();
    let expr = engine
        .parse(None, "@0 + 1", &[Binding::Expr(fragment)])
        .unwrap();
    assert_eq!(evaluate(&expr).unwrap(), Value::Int32(22));
}

#[test]
fn test_group_by_levels() {
    let (engine, user, profile) = user_model();
    let items = vec![
        make_user(&user, &profile, 1, "a", "Ann", 30),
        make_user(&user, &profile, 2, "b", "Ann", 40),
        make_user(&user, &profile, 3, "c", "Bo", 30),
    ];
    let query = Query::new(&engine, Ty::Class(user), items);
    let groups = query
        .group_by_many(&["Profile.FirstName", "Profile.Age"], &[])
        .unwrap();
    assert_eq!(groups.len(), 2);
    assert_eq!(groups[0].key, Value::String("Ann".into()));
    assert_eq!(groups[0].count, 2);
    let sub = groups[0].subgroups.as_ref().unwrap();
    assert_eq!(sub.len(), 2);
    assert_eq!(sub[0].key, Value::Int32(30));
}

#[test]
fn test_nullable_arithmetic_flows() {
    let engine = Engine::new();
    let expr = engine.parse(None, "Int32?(5) + 1", &[]).unwrap();
    assert_eq!(expr.ty, Ty::Nullable(Box::new(Ty::Int32)));
    assert_eq!(evaluate(&expr).unwrap(), Value::Int32(6));

    let expr = engine.parse(None, "null != Int32?(5)", &[]).unwrap();
    assert_eq!(evaluate(&expr).unwrap(), Value::Bool(true));
}

#[test]
fn test_tuple_ordering_operators() {
    let engine = Engine::new();
    let expr = engine
        .parse(Some(&Ty::Bool), "tuple(1, 2) < tuple(1, 3)", &[])
        .unwrap();
    assert_eq!(evaluate(&expr).unwrap(), Value::Bool(true));
    let expr = engine
        .parse(Some(&Ty::Bool), "tuple(2, \"a\") == tuple(2, \"a\")", &[])
        .unwrap();
    assert_eq!(evaluate(&expr).unwrap(), Value::Bool(true));
    let expr = engine
        .parse(Some(&Ty::Bool), "tuple(1, 2) != tuple(1, 3)", &[])
        .unwrap();
    assert_eq!(evaluate(&expr).unwrap(), Value::Bool(true));
}

#[test]
fn test_literal_node_types_are_always_set() {
    let engine = Engine::new();
    for text in ["1", "1.5", "\"s\"", "true", "null", "tuple(1)", "1 + 2 * 3"] {
        let expr = engine.parse(None, text, &[]).unwrap();
        // Every node carries a type; spot-check the root and one child.
        match &expr.kind {
            ExprKind::Binary { left, .. } => assert_ne!(format!("{}", left.ty), ""),
            _ => {}
        }
        assert_ne!(format!("{}", expr.ty), "");
    }
}
