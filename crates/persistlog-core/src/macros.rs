//! Call-site capturing macros.

/// Build a [`SiteInfo`](crate::SiteInfo) for the current file, function and line.
#[macro_export]
macro_rules! site {
    () => {
        $crate::SiteInfo::new(
            ::std::file!(),
            {
                fn __here() {}
                fn __name_of<T>(_: T) -> &'static str {
                    ::std::any::type_name::<T>()
                }
                let name = __name_of(__here);
                name.strip_suffix("::__here")
                    .unwrap_or(name)
                    .trim_end_matches("::{{closure}}")
            },
            ::std::line!(),
        )
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __log_at {
    ($level:expr, $logger:expr, filter: $filter:expr, $($arg:tt)+) => {
        $logger.log(
            $level,
            ::std::format!($($arg)+),
            ::std::option::Option::Some(::std::convert::AsRef::<str>::as_ref(&$filter)),
            $crate::site!(),
        )
    };
    ($level:expr, $logger:expr, $($arg:tt)+) => {
        $logger.log(
            $level,
            ::std::format!($($arg)+),
            ::std::option::Option::None,
            $crate::site!(),
        )
    };
}

/// Log at `Debug` with the caller's site: `log_debug!(logger, filter: "ui", "x = {}", x)`.
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)+) => { $crate::__log_at!($crate::LogLevel::Debug, $($arg)+) };
}

/// Log at `Info` with the caller's site.
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)+) => { $crate::__log_at!($crate::LogLevel::Info, $($arg)+) };
}

/// Log at `Warn` with the caller's site.
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)+) => { $crate::__log_at!($crate::LogLevel::Warn, $($arg)+) };
}

/// Log at `Error` with the caller's site.
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)+) => { $crate::__log_at!($crate::LogLevel::Error, $($arg)+) };
}

/// Log a request/response pair: `log_network!(logger, filter: "Network", request, response)`.
#[macro_export]
macro_rules! log_network {
    ($logger:expr, filter: $filter:expr, $request:expr, $response:expr $(,)?) => {
        $logger.network(
            $request,
            $response,
            ::std::option::Option::Some(::std::convert::AsRef::<str>::as_ref(&$filter)),
            $crate::site!(),
        )
    };
    ($logger:expr, $request:expr, $response:expr $(,)?) => {
        $logger.network($request, $response, ::std::option::Option::None, $crate::site!())
    };
}
