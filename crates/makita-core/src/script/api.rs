// Makita Script API
// Functions, constants and the event userdata installed into the Lua state

use mlua::{
    Function, Lua, MetaMethod, Table, UserData, UserDataFields, UserDataMethods, UserDataRef,
    Value, Variadic,
};

use super::context::SharedContext;
use crate::bridge::StateResponse;
use crate::event::{Action, EventType, Event, SyntheticEvent};
use crate::key::{char_to_key, key_from_name, named_keys};

const PRELUDE: &str = include_str!("prelude.lua");

impl UserData for Event {
    fn add_fields<F: UserDataFields<Self>>(fields: &mut F) {
        fields.add_field_method_get("type", |_, this| Ok(this.event_type().0));
        fields.add_field_method_get("code", |_, this| Ok(this.code()));
        fields.add_field_method_get("value", |_, this| Ok(this.value()));
        fields.add_field_method_get("script", |_, this| {
            Ok(this.script().map(str::to_string))
        });
        fields.add_field_method_get("timestamp", |_, this| Ok(this.timestamp().as_secs_f64()));
    }

    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_method("key", |_, this, ()| Ok(this.key_identity().map(|k| k.code())));
        methods.add_method("is_key_down", |_, this, ()| Ok(this.is_key_down()));
        methods.add_method("is_key_up", |_, this, ()| Ok(this.is_key_up()));
        methods.add_method("is_key_hold", |_, this, ()| Ok(this.is_key_hold()));
        methods.add_meta_method(MetaMethod::ToString, |_, this, ()| Ok(this.to_string()));
    }
}

/// Handles into the Lua state the scheduler needs after installation
#[derive(Debug, Clone)]
pub struct ScriptApi {
    /// `__task_body(chunk, env)`: builds the coroutine body for a script
    pub task_body: Function,
    /// `__script_env(shared)`: builds a fresh script environment
    pub env_factory: Function,
    /// Scratch table shared by every script
    pub shared: Table,
}

impl ScriptApi {
    /// Install the script-facing surface into `lua`
    pub fn install(lua: &Lua, context: SharedContext) -> mlua::Result<Self> {
        install_output(lua, &context)?;
        install_keys(lua)?;
        install_logging(lua, &context)?;

        lua.load(PRELUDE).set_name("prelude").exec()?;

        let globals = lua.globals();
        let shared = lua.create_table()?;
        globals.set("shared", shared.clone())?;

        Ok(Self {
            task_body: globals.get("__task_body")?,
            env_factory: globals.get("__script_env")?,
            shared,
        })
    }

    /// Fresh environment for one script: its own globals, falling back to `_G`
    pub fn new_env(&self) -> mlua::Result<Table> {
        self.env_factory.call(self.shared.clone())
    }
}

fn emit(context: &SharedContext, event: SyntheticEvent, primitive: &str) -> mlua::Result<()> {
    context
        .borrow_mut()
        .emit(event, primitive)
        .map_err(mlua::Error::RuntimeError)
}

fn install_output(lua: &Lua, context: &SharedContext) -> mlua::Result<()> {
    let globals = lua.globals();

    let ctx = context.clone();
    globals.set(
        "press",
        lua.create_function(move |_, code: u16| {
            emit(&ctx, SyntheticEvent::key(code, Action::Press), "press")
        })?,
    )?;

    let ctx = context.clone();
    globals.set(
        "release",
        lua.create_function(move |_, code: u16| {
            emit(&ctx, SyntheticEvent::key(code, Action::Release), "release")
        })?,
    )?;

    let ctx = context.clone();
    globals.set(
        "press_down",
        lua.create_function(move |_, codes: Variadic<u16>| {
            for code in codes.iter() {
                emit(&ctx, SyntheticEvent::key(*code, Action::Press), "press_down")?;
            }
            Ok(())
        })?,
    )?;

    let ctx = context.clone();
    globals.set(
        "pass",
        lua.create_function(move |_, event: UserDataRef<Event>| {
            let synthetic = SyntheticEvent::new(event.event_type(), event.code(), event.value());
            emit(&ctx, synthetic, "pass")
        })?,
    )?;

    let ctx = context.clone();
    globals.set(
        "send_event",
        lua.create_function(move |_, (event_type, code, value): (u16, u16, i32)| {
            emit(
                &ctx,
                SyntheticEvent::new(EventType(event_type), code, value),
                "send_event",
            )
        })?,
    )?;

    let ctx = context.clone();
    globals.set(
        "consume",
        lua.create_function(move |_, ()| {
            ctx.borrow_mut().consume().map_err(mlua::Error::RuntimeError)
        })?,
    )?;

    Ok(())
}

fn install_keys(lua: &Lua) -> mlua::Result<()> {
    let globals = lua.globals();

    let keys = lua.create_table()?;
    for (name, key) in named_keys() {
        keys.set(name, key.code())?;
    }
    globals.set("KEY", keys)?;

    globals.set(
        "key_code",
        lua.create_function(|_, name: String| Ok(key_from_name(&name).map(|k| k.code())))?,
    )?;

    globals.set(
        "__char_key",
        lua.create_function(|_, ch: String| {
            let mapped = ch
                .chars()
                .next()
                .filter(|_| ch.chars().count() == 1)
                .and_then(char_to_key);
            Ok(match mapped {
                Some((key, shifted)) => (Some(key.code()), shifted),
                None => (None, false),
            })
        })?,
    )?;

    Ok(())
}

fn install_logging(lua: &Lua, context: &SharedContext) -> mlua::Result<()> {
    let ctx = context.clone();
    lua.globals().set(
        "log",
        lua.create_function(move |_, (level, message): (String, String)| {
            let level = level.parse::<log::Level>().unwrap_or(log::Level::Info);
            ctx.borrow_mut().log(level, message);
            Ok(())
        })?,
    )
}

/// Convert a host answer into the value a parked task resumes with
pub fn response_to_lua(lua: &Lua, response: StateResponse) -> mlua::Result<Value> {
    Ok(match response {
        StateResponse::Flag(flag) => Value::Boolean(flag),
        StateResponse::Number(n) => Value::Integer(n),
        StateResponse::Codes(codes) => Value::Table(lua.create_sequence_from(codes)?),
        StateResponse::Text(text) => Value::String(lua.create_string(&text)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::context::ScriptContext;

    fn installed() -> (Lua, SharedContext) {
        let lua = Lua::new();
        let context = ScriptContext::shared();
        ScriptApi::install(&lua, context.clone()).unwrap();
        (lua, context)
    }

    #[test]
    fn test_key_table_and_lookup() {
        let (lua, _) = installed();
        let a: u16 = lua.load("return KEY.A").eval().unwrap();
        assert_eq!(a, 30);
        let shift: Option<u16> = lua.load("return key_code('LEFT_SHIFT')").eval().unwrap();
        assert_eq!(shift, Some(42));
        let missing: Option<u16> = lua.load("return key_code('NOPE')").eval().unwrap();
        assert_eq!(missing, None);
    }

    #[test]
    fn test_event_userdata_fields() {
        let (lua, _) = installed();
        let event = Event::key(30, Action::Press).targeted("echo");
        lua.globals().set("ev", event).unwrap();

        let (ty, code, value, script): (u16, u16, i32, String) = lua
            .load("return ev.type, ev.code, ev.value, ev.script")
            .eval()
            .unwrap();
        assert_eq!((ty, code, value, script.as_str()), (1, 30, 1, "echo"));

        let (down, up, key): (bool, bool, Option<u16>) = lua
            .load("return ev:is_key_down(), ev:is_key_up(), ev:key()")
            .eval()
            .unwrap();
        assert!(down && !up);
        assert_eq!(key, Some(30));
    }

    #[test]
    fn test_key_is_nil_for_code_zero() {
        let (lua, _) = installed();
        lua.globals()
            .set("ev", Event::key(0, Action::Press))
            .unwrap();
        let key: Option<u16> = lua.load("return ev:key()").eval().unwrap();
        assert_eq!(key, None);
    }

    #[test]
    fn test_output_primitives_fail_outside_a_task() {
        let (lua, context) = installed();
        assert!(lua.load("press(30)").exec().is_err());
        assert!(lua.load("consume()").exec().is_err());
        assert!(lua.load("sleep(1)").exec().is_err());
        assert_eq!(context.borrow().pending_output(), 0);
    }

    #[test]
    fn test_output_primitives_queue_in_order() {
        let (lua, context) = installed();
        context.borrow_mut().begin("echo");
        lua.load("press(30) release(30) press_down(29, 42) send_event(2, 0, 5)")
            .exec()
            .unwrap();
        context.borrow_mut().end();

        let triples: Vec<_> = context
            .borrow_mut()
            .flush_output()
            .iter()
            .map(SyntheticEvent::triple)
            .collect();
        assert_eq!(triples, vec![(1, 30, 1), (1, 30, 0), (1, 29, 1), (1, 42, 1), (2, 0, 5)]);
    }

    #[test]
    fn test_response_conversion() {
        let lua = Lua::new();
        let codes = response_to_lua(&lua, StateResponse::Codes(vec![29, 42])).unwrap();
        let table = codes.as_table().unwrap();
        assert_eq!(table.raw_len(), 2);
        assert_eq!(table.get::<u16>(2).unwrap(), 42);
        assert_eq!(
            response_to_lua(&lua, StateResponse::Flag(true)).unwrap(),
            Value::Boolean(true)
        );
    }
}
